//! Child performance classification and rank rewards.
//!
//! Comparison is supplied by the caller as `better(a, b)`, true when `a` is
//! strictly better than `b`.

use super::Performance;

/// Classify a child against the population extremes and its parents.
///
/// Better than `best` is very good, not better than `worst` is very bad.
/// Otherwise the child is good when it beats every parent, bad when it beats
/// none and normal in between.
pub fn classify_child<T>(
    child: &T,
    best: Option<&T>,
    worst: Option<&T>,
    parents: &[&T],
    better: impl Fn(&T, &T) -> bool,
) -> Performance {
    if best.is_some_and(|b| better(child, b)) {
        return Performance::VeryGood;
    }
    if worst.is_some_and(|w| !better(child, w)) {
        return Performance::VeryBad;
    }

    let improvements = parents.iter().filter(|&&p| better(child, p)).count();
    if improvements == parents.len() {
        Performance::Good
    } else if improvements == 0 {
        Performance::Bad
    } else {
        Performance::Normal
    }
}

/// Rank rewards for the new candidates in `everyone`.
///
/// Candidates are peeled into successive fronts: class 1 holds those no
/// candidate beats, class 2 those only beaten from class 1, and so on. Any
/// strict partial order works, so dominance comparisons are fine. A new
/// candidate in class `c` (1-based) of `n` gets `(n - c) / (n - 1)`.
/// Returns `(index into everyone, reward)` pairs, empty when all candidates
/// are equivalent.
pub fn rank_rewards<T>(
    everyone: &[T],
    is_new: impl Fn(&T) -> bool,
    better: impl Fn(&T, &T) -> bool,
) -> Vec<(usize, f64)> {
    let mut class_of = vec![0usize; everyone.len()];
    let mut remaining: Vec<usize> = (0..everyone.len()).collect();
    let mut class_count = 0usize;

    while !remaining.is_empty() {
        class_count += 1;
        let (front, rest): (Vec<usize>, Vec<usize>) =
            remaining.iter().copied().partition(|&i| {
                !remaining
                    .iter()
                    .any(|&j| better(&everyone[j], &everyone[i]))
            });

        // A cyclic comparator leaves no unbeaten candidate.
        if front.is_empty() {
            for &i in &rest {
                class_of[i] = class_count;
            }
            break;
        }
        for &i in &front {
            class_of[i] = class_count;
        }
        remaining = rest;
    }

    if class_count <= 1 {
        return Vec::new();
    }
    let denominator = (class_count - 1) as f64;
    (0..everyone.len())
        .filter(|&i| is_new(&everyone[i]))
        .map(|i| (i, (class_count - class_of[i]) as f64 / denominator))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn higher(a: &u32, b: &u32) -> bool {
        a > b
    }

    #[test]
    fn test_classify_extremes() {
        assert_eq!(
            classify_child(&10, Some(&8), Some(&1), &[], higher),
            Performance::VeryGood
        );
        assert_eq!(
            classify_child(&1, Some(&8), Some(&1), &[&5], higher),
            Performance::VeryBad
        );
    }

    #[test]
    fn test_classify_against_parents() {
        let (a, b) = (3u32, 6u32);
        assert_eq!(
            classify_child(&7, Some(&8), Some(&1), &[&a, &b], higher),
            Performance::Good
        );
        assert_eq!(
            classify_child(&4, Some(&8), Some(&1), &[&a, &b], higher),
            Performance::Normal
        );
        assert_eq!(
            classify_child(&2, Some(&8), Some(&1), &[&a, &b], higher),
            Performance::Bad
        );
    }

    #[test]
    fn test_rank_rewards() {
        // Fitness, new flag
        let everyone = [(5u32, true), (9, false), (5, true), (1, true)];
        let rewards = rank_rewards(&everyone, |c| c.1, |a, b| a.0 > b.0);

        let reward_of = |i: usize| rewards.iter().find(|r| r.0 == i).map(|r| r.1);
        // Classes: 9 -> 1, 5 -> 2, 1 -> 3
        assert_eq!(reward_of(0), Some(0.5));
        assert_eq!(reward_of(2), Some(0.5));
        assert_eq!(reward_of(3), Some(0.0));
        assert_eq!(reward_of(1), None);
    }

    #[test]
    fn test_rank_rewards_dominance() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        fn dominates(a: &(u32, u32, bool), b: &(u32, u32, bool)) -> bool {
            a.0 >= b.0 && a.1 >= b.1 && (a.0 > b.0 || a.1 > b.1)
        }

        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..20 {
            let everyone: Vec<(u32, u32, bool)> = (0..60)
                .map(|_| (rng.gen_range(0..10), rng.gen_range(0..10), rng.gen_bool(0.5)))
                .collect();
            let rewards = rank_rewards(&everyone, |c| c.2, dominates);

            assert_eq!(rewards.len(), everyone.iter().filter(|c| c.2).count());
            assert!(rewards.iter().all(|r| (0.0..=1.0).contains(&r.1)));
            for &(a, reward_a) in &rewards {
                for &(b, reward_b) in &rewards {
                    if dominates(&everyone[a], &everyone[b]) {
                        assert!(reward_a > reward_b);
                    }
                }
            }
        }
    }

    #[test]
    fn test_single_class_no_rewards() {
        let everyone = [(3u32, true), (3, true)];
        assert!(rank_rewards(&everyone, |c| c.1, |a, b| a.0 > b.0).is_empty());
    }
}
