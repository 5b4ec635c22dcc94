//! Hash table of the DynlibData segment.
//!
//! The runtime's bucket computation does not match the standard SysV scheme,
//! so the table degenerates to a single bucket whose chain walks every
//! symbol: `{nbucket: 1, nchain: n}`, bucket `[1]`, and a chain where entry
//! `i` holds `i + 1` except for the terminating zeros at both ends.

pub(super) fn write(data: &mut Vec<u8>, symbol_count: usize) -> u64 {
    let start = data.len();
    let n = symbol_count as u32;

    let mut push = |value: u32| data.extend_from_slice(&value.to_le_bytes());

    push(1); // nbucket
    push(n); // nchain
    push(1); // bucket[0]

    if n > 0 {
        push(0);
        for i in 1..n.saturating_sub(1) {
            push(i + 1);
        }
        if n > 1 {
            push(0);
        }
    }

    (data.len() - start) as u64
}
