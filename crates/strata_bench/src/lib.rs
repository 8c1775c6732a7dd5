//! Benchmark utilities.

use rand::Rng;

/// Generate `count` values below `max`.
pub fn random_values(count: usize, max: u64) -> Vec<u64> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| rng.gen_range(0..max)).collect()
}

/// Generate `count` values whose encoded lengths span 1 to 9 bytes.
pub fn mixed_width_values(count: usize) -> Vec<u64> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let bits = rng.gen_range(0..64);
            rng.gen::<u64>() >> bits
        })
        .collect()
}

/// Generate `count` signed values around zero.
pub fn random_signed(count: usize, span: i64) -> Vec<i64> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| rng.gen_range(-span..=span)).collect()
}

/// Generate `count` positions below `len`.
pub fn random_positions(count: usize, len: usize) -> Vec<usize> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| rng.gen_range(0..len.max(1))).collect()
}
