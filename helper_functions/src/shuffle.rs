use types::config::Config;
use types::primitives::{ValidatorIndex, H256};

use crate::crypto::hash;
use crate::math::bytes_to_int;

const SEED_SIZE: usize = 32;
const PIVOT_VIEW_SIZE: usize = SEED_SIZE + 1;
const POSITION_WINDOW_SIZE: usize = 4;
const TOTAL_SIZE: usize = PIVOT_VIEW_SIZE + POSITION_WINDOW_SIZE;

/// Shuffles a list in place, using the given seed for randomness.
pub fn shuffle_list<C: Config>(input: &mut [ValidatorIndex], seed: H256) {
    inner_shuffle_list::<C>(input, seed, true)
}

/// Undoes a list shuffling that used the seed of the shuffling.
pub fn unshuffle_list<C: Config>(input: &mut [ValidatorIndex], seed: H256) {
    inner_shuffle_list::<C>(input, seed, false)
}

// The swap-or-not network processes every position of the list once per
// round, as two mirrored passes around the pivot. The hash input is packed
// into one buffer: seed (32 bytes), round (1 byte), position >> 8 (4
// bytes); only the tail changes while walking, and the `source` hash is
// reused for 256 consecutive positions.
fn inner_shuffle_list<C: Config>(input: &mut [ValidatorIndex], seed: H256, forwards: bool) {
    if input.len() <= 1 {
        return;
    }

    let list_size = input.len() as u64;
    let rounds = C::shuffle_round_count();
    if rounds == 0 {
        return;
    }

    let mut buf = [0; TOTAL_SIZE];
    buf[..SEED_SIZE].copy_from_slice(seed.as_bytes());

    let mut r = if forwards { 0 } else { rounds - 1 };

    loop {
        buf[SEED_SIZE] = r;

        let pivot = bytes_to_int(&hash(&buf[..PIVOT_VIEW_SIZE])) % list_size;

        // First pass: 0 (incl) to pivot (incl), mirrored around pivot / 2.
        let mut mirror = (pivot + 1) >> 1;
        set_position_window(&mut buf, pivot);
        let mut source = hash(&buf);
        let mut byte_v = source[((pivot & 0xff) >> 3) as usize];
        let (mut i, mut j) = (0, pivot);
        while i < mirror {
            // j is the greater of the pair and names its position.
            if j & 0xff == 0xff {
                set_position_window(&mut buf, j);
                source = hash(&buf);
            }
            if j & 0x07 == 0x07 {
                byte_v = source[((j & 0xff) >> 3) as usize];
            }
            if (byte_v >> (j & 0x07)) & 0x01 == 1 {
                input.swap(i as usize, j as usize);
            }
            i += 1;
            j -= 1;
        }

        // Second pass: pivot (excl) to the end, mirrored around
        // (pivot + list_size) / 2. Walks from the end back to the mirror
        // point so each pair is touched exactly once.
        mirror = (pivot + list_size + 1) >> 1;
        let end = list_size - 1;
        set_position_window(&mut buf, end);
        source = hash(&buf);
        byte_v = source[((end & 0xff) >> 3) as usize];
        let (mut i, mut j) = (pivot + 1, end);
        while i < mirror {
            if j & 0xff == 0xff {
                set_position_window(&mut buf, j);
                source = hash(&buf);
            }
            if j & 0x07 == 0x07 {
                byte_v = source[((j & 0xff) >> 3) as usize];
            }
            if (byte_v >> (j & 0x07)) & 0x01 == 1 {
                input.swap(i as usize, j as usize);
            }
            i += 1;
            j -= 1;
        }

        if forwards {
            r += 1;
            if r == rounds {
                break;
            }
        } else {
            if r == 0 {
                break;
            }
            r -= 1;
        }
    }
}

fn set_position_window(buf: &mut [u8; TOTAL_SIZE], position: u64) {
    let window = ((position >> 8) as u32).to_le_bytes();
    buf[PIVOT_VIEW_SIZE..].copy_from_slice(&window);
}

#[cfg(test)]
mod tests {
    use types::config::{MainnetConfig, MinimalConfig};

    use super::*;
    use crate::misc::compute_shuffled_index;

    #[test]
    fn shuffle_round_trips_to_identity() {
        let seed = H256::from([0xAB; 32]);
        let mut indices: Vec<ValidatorIndex> = (0..1024).collect();

        shuffle_list::<MainnetConfig>(&mut indices, seed);
        assert_ne!(indices, (0..1024).collect::<Vec<_>>());

        unshuffle_list::<MainnetConfig>(&mut indices, seed);
        assert_eq!(indices, (0..1024).collect::<Vec<_>>());
    }

    #[test]
    fn unshuffle_then_shuffle_is_identity() {
        let seed = H256::from([0x42; 32]);
        let mut indices: Vec<ValidatorIndex> = (0..333).collect();

        unshuffle_list::<MinimalConfig>(&mut indices, seed);
        shuffle_list::<MinimalConfig>(&mut indices, seed);
        assert_eq!(indices, (0..333).collect::<Vec<_>>());
    }

    #[test]
    fn bulk_shuffle_agrees_with_single_index() {
        let seed = H256::from([0x17; 32]);
        let count = 97;
        let mut shuffled: Vec<ValidatorIndex> = (0..count).collect();
        shuffle_list::<MinimalConfig>(&mut shuffled, seed);

        for index in 0..count {
            let destination =
                compute_shuffled_index::<MinimalConfig>(index, count, seed).unwrap();
            assert_eq!(shuffled[destination as usize], index);
        }
    }

    #[test]
    fn short_lists_are_left_alone() {
        let seed = H256::from([0x01; 32]);
        let mut empty: Vec<ValidatorIndex> = vec![];
        shuffle_list::<MainnetConfig>(&mut empty, seed);
        assert!(empty.is_empty());

        let mut single = vec![7];
        shuffle_list::<MainnetConfig>(&mut single, seed);
        assert_eq!(single, vec![7]);
    }
}
