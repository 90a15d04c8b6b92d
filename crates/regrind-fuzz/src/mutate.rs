//! Length-preserving mutation operators for fixed-length subjects.
//!
//! Each operator takes a child buffer already initialized from its parent
//! and perturbs it in place. Operator choice is a fixed 16-slot weighted
//! mixture; the weights are a design constant, not a tunable.

use rand::Rng;

use crate::unit::CodeUnit;

/// Which operator to apply, drawn from [`DISPATCH`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    RandomUnit,
    Arith,
    Overwrite,
    Crossover,
    Duplicate,
    Special,
    Rotate,
}

/// The dispatch mixture: weights (of 16) are
/// random 1, arith 2, overwrite 2, crossover 2, duplicate 2, special 4,
/// rotate 3. `bit_flip` and `swap_units` exist as operators but carry no
/// weight.
const DISPATCH: [Operator; 16] = [
    Operator::RandomUnit,
    Operator::Arith,
    Operator::Arith,
    Operator::Overwrite,
    Operator::Overwrite,
    Operator::Crossover,
    Operator::Crossover,
    Operator::Duplicate,
    Operator::Duplicate,
    Operator::Special,
    Operator::Special,
    Operator::Special,
    Operator::Special,
    Operator::Rotate,
    Operator::Rotate,
    Operator::Rotate,
];

/// Replace one uniformly chosen position with a uniformly random unit.
pub fn random_unit<C: CodeUnit, R: Rng>(buf: &mut [C], rng: &mut R) {
    let i = rng.gen_range(0..buf.len());
    buf[i] = C::from_u32(rng.gen::<u32>());
}

/// Add a nonzero delta in `[-8, 8]` to one position, wrapping.
pub fn arith_unit<C: CodeUnit, R: Rng>(buf: &mut [C], rng: &mut R) {
    let i = rng.gen_range(0..buf.len());
    let delta = loop {
        let d = rng.gen_range(-8i32..=8);
        if d != 0 {
            break d;
        }
    };
    buf[i] = buf[i].wrapping_add_i32(delta);
}

/// Copy the unit at one position over another. This reproduces the
/// historical "swap" operator, which overwrote the source position and left
/// the destination untouched; see [`swap_units`] for the real exchange.
pub fn overwrite_with_another<C: CodeUnit, R: Rng>(buf: &mut [C], rng: &mut R) {
    if buf.len() < 2 {
        return;
    }
    let src = rng.gen_range(0..buf.len());
    let dst = loop {
        let d = rng.gen_range(0..buf.len());
        if d != src {
            break d;
        }
    };
    buf[src] = buf[dst];
}

/// Exchange two distinct positions.
pub fn swap_units<C: CodeUnit, R: Rng>(buf: &mut [C], rng: &mut R) {
    if buf.len() < 2 {
        return;
    }
    let a = rng.gen_range(0..buf.len());
    let b = loop {
        let b = rng.gen_range(0..buf.len());
        if b != a {
            break b;
        }
    };
    buf.swap(a, b);
}

/// XOR one random bit of one random unit.
pub fn bit_flip<C: CodeUnit, R: Rng>(buf: &mut [C], rng: &mut R) {
    let i = rng.gen_range(0..buf.len());
    let bit = rng.gen_range(0..C::BITS);
    buf[i] = C::from_u32(buf[i].to_u32() ^ (1 << bit));
}

/// Copy a uniformly chosen span of `coparent` over the same span of `buf`.
pub fn crossover<C: CodeUnit, R: Rng>(buf: &mut [C], coparent: &[C], rng: &mut R) {
    let a = rng.gen_range(0..buf.len());
    let b = rng.gen_range(0..buf.len());
    let lo = a.min(b);
    // The end is exclusive; clamp keeps the historical off-by-one harmless.
    let hi = (a.max(b) + 1).min(buf.len());
    buf[lo..hi].copy_from_slice(&coparent[lo..hi]);
}

/// Duplicate a substring of length `[1, len-1]` at a distinct offset,
/// possibly overlapping. No-op on one-unit buffers.
pub fn duplicate_subsequence<C: CodeUnit, R: Rng>(buf: &mut [C], rng: &mut R) {
    if buf.len() < 2 {
        return;
    }
    let sub_len = rng.gen_range(1..buf.len());
    let src = rng.gen_range(0..=buf.len() - sub_len);
    let dst = loop {
        let d = rng.gen_range(0..=buf.len() - sub_len);
        if d != src {
            break d;
        }
    };
    buf.copy_within(src..src + sub_len, dst);
}

/// Write one value drawn uniformly from the built-in interesting table and
/// the corpus-mined extras at a random position.
pub fn replace_with_special<C: CodeUnit, R: Rng>(buf: &mut [C], extra: &[C], rng: &mut R) {
    let builtin = C::builtin_specials();
    let choice = rng.gen_range(0..builtin.len() + extra.len());
    let c = if choice < builtin.len() {
        builtin[choice]
    } else {
        extra[choice - builtin.len()]
    };
    let i = rng.gen_range(0..buf.len());
    buf[i] = c;
}

/// Rotate by one position, direction chosen uniformly.
pub fn rotate_once<C: CodeUnit, R: Rng>(buf: &mut [C], rng: &mut R) {
    if rng.gen_bool(0.5) {
        buf.rotate_left(1);
    } else {
        buf.rotate_right(1);
    }
}

/// Apply one operator drawn from the dispatch mixture.
pub fn mutate<C: CodeUnit, R: Rng>(buf: &mut [C], coparent: &[C], extra: &[C], rng: &mut R) {
    match DISPATCH[rng.gen_range(0..DISPATCH.len())] {
        Operator::RandomUnit => random_unit(buf, rng),
        Operator::Arith => arith_unit(buf, rng),
        Operator::Overwrite => overwrite_with_another(buf, rng),
        Operator::Crossover => crossover(buf, coparent, rng),
        Operator::Duplicate => duplicate_subsequence(buf, rng),
        Operator::Special => replace_with_special(buf, extra, rng),
        Operator::Rotate => rotate_once(buf, rng),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn rng(seed: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(seed)
    }

    fn sorted<C: CodeUnit>(buf: &[C]) -> Vec<C> {
        let mut v = buf.to_vec();
        v.sort();
        v
    }

    #[test]
    fn test_all_operators_preserve_length() {
        let mut r = rng(7);
        let coparent: Vec<u8> = (0..16).map(|i| i as u8).collect();
        for _ in 0..200 {
            let mut buf = vec![b'a'; 16];
            random_unit(&mut buf, &mut r);
            arith_unit(&mut buf, &mut r);
            overwrite_with_another(&mut buf, &mut r);
            swap_units(&mut buf, &mut r);
            bit_flip(&mut buf, &mut r);
            crossover(&mut buf, &coparent, &mut r);
            duplicate_subsequence(&mut buf, &mut r);
            replace_with_special(&mut buf, &[0x7fu8], &mut r);
            rotate_once(&mut buf, &mut r);
            assert_eq!(buf.len(), 16);
        }
    }

    #[test]
    fn test_bit_flip_changes_exactly_one_bit() {
        let mut r = rng(11);
        for _ in 0..100 {
            let mut buf: Vec<u16> = vec![0x1234, 0x5678, 0x9abc];
            let before = buf.clone();
            bit_flip(&mut buf, &mut r);
            let differing: u32 = buf
                .iter()
                .zip(before.iter())
                .map(|(a, b)| (a ^ b).count_ones())
                .sum();
            assert_eq!(differing, 1);
        }
    }

    #[test]
    fn test_rotate_is_a_permutation() {
        let mut r = rng(13);
        for _ in 0..50 {
            let mut buf: Vec<u8> = (0..9).map(|i| i * 17).collect();
            let before = sorted(&buf);
            rotate_once(&mut buf, &mut r);
            assert_eq!(sorted(&buf), before);
        }
    }

    #[test]
    fn test_rotate_moves_every_unit() {
        let mut buf = vec![1u8, 2, 3, 4];
        let mut r = rng(1);
        rotate_once(&mut buf, &mut r);
        assert!(buf == vec![2, 3, 4, 1] || buf == vec![4, 1, 2, 3]);
    }

    #[test]
    fn test_overwrite_is_not_a_swap() {
        // After the operator, the multiset loses one value and doubles
        // another; a true swap would keep the multiset intact.
        let mut r = rng(3);
        let mut changed_multiset = false;
        for _ in 0..50 {
            let mut buf: Vec<u8> = (0..8).collect();
            let before = sorted(&buf);
            overwrite_with_another(&mut buf, &mut r);
            if sorted(&buf) != before {
                changed_multiset = true;
            }
            // Exactly one position differs from the identity layout.
            let diffs = buf.iter().enumerate().filter(|&(i, &v)| v != i as u8).count();
            assert_eq!(diffs, 1);
        }
        assert!(changed_multiset);
    }

    #[test]
    fn test_swap_units_keeps_multiset() {
        let mut r = rng(5);
        for _ in 0..50 {
            let mut buf: Vec<u8> = (0..8).collect();
            let before = sorted(&buf);
            swap_units(&mut buf, &mut r);
            assert_eq!(sorted(&buf), before);
        }
    }

    #[test]
    fn test_arith_delta_bounds() {
        let mut r = rng(17);
        for _ in 0..200 {
            let mut buf = vec![100u8; 4];
            arith_unit(&mut buf, &mut r);
            let moved: Vec<_> = buf.iter().filter(|&&v| v != 100).collect();
            assert_eq!(moved.len(), 1);
            let delta = (*moved[0] as i32) - 100;
            assert!((-8..=8).contains(&delta) && delta != 0, "delta {}", delta);
        }
    }

    #[test]
    fn test_crossover_copies_span_from_coparent() {
        let mut r = rng(23);
        let coparent = vec![0xee_u8; 12];
        for _ in 0..100 {
            let mut buf = vec![0x11_u8; 12];
            crossover(&mut buf, &coparent, &mut r);
            // The copied region is contiguous and non-empty.
            let marks: Vec<usize> = buf
                .iter()
                .enumerate()
                .filter(|&(_, &v)| v == 0xee)
                .map(|(i, _)| i)
                .collect();
            assert!(!marks.is_empty());
            assert_eq!(marks.last().unwrap() - marks[0] + 1, marks.len());
        }
    }

    #[test]
    fn test_duplicate_noop_on_single_unit() {
        let mut r = rng(29);
        let mut buf = vec![b'q'];
        duplicate_subsequence(&mut buf, &mut r);
        assert_eq!(buf, vec![b'q']);
    }

    #[test]
    fn test_replace_with_special_draws_from_both_pools() {
        let mut r = rng(31);
        let extra = vec![0x7f_u8];
        let mut saw_builtin = false;
        let mut saw_extra = false;
        for _ in 0..400 {
            let mut buf = vec![b'a'; 4];
            replace_with_special(&mut buf, &extra, &mut r);
            for &b in &buf {
                if b == 0x7f {
                    saw_extra = true;
                } else if u8::builtin_specials().contains(&b) {
                    saw_builtin = true;
                }
            }
        }
        assert!(saw_builtin && saw_extra);
    }

    #[test]
    fn test_mutate_deterministic_for_seed() {
        let coparent = vec![9u8; 10];
        let run = |seed| {
            let mut r = rng(seed);
            let mut buf = vec![b'a'; 10];
            for _ in 0..50 {
                mutate(&mut buf, &coparent, &[], &mut r);
            }
            buf
        };
        assert_eq!(run(42), run(42));
        assert_ne!(run(42), run(43));
    }

    #[test]
    fn test_mutate_two_byte_units() {
        let coparent = vec![0x2603u16; 6];
        let mut r = rng(37);
        let mut buf = vec![b'a' as u16; 6];
        for _ in 0..100 {
            mutate(&mut buf, &coparent, &[0xffffu16], &mut r);
            assert_eq!(buf.len(), 6);
        }
    }
}
