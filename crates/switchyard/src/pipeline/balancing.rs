use rand::seq::SliceRandom;
use rand::Rng;

/// Pick one backend uniformly at random. No health tracking: a dead
/// backend keeps its share of traffic.
pub fn select_backend<'a, R: Rng + ?Sized>(
    addresses: &'a [String],
    rng: &mut R,
) -> Option<&'a str> {
    addresses.choose(rng).map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    #[test]
    fn test_empty_list_selects_nothing() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(select_backend(&[], &mut rng).is_none());
    }

    #[test]
    fn test_single_backend_always_selected() {
        let mut rng = StdRng::seed_from_u64(7);
        let addresses = vec!["http://a".to_string()];
        for _ in 0..10 {
            assert_eq!(select_backend(&addresses, &mut rng), Some("http://a"));
        }
    }

    #[test]
    fn test_selection_is_roughly_uniform() {
        let mut rng = StdRng::seed_from_u64(42);
        let addresses: Vec<String> = ["http://a", "http://b", "http://c"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for _ in 0..3000 {
            let picked = select_backend(&addresses, &mut rng).unwrap();
            *counts.entry(picked).or_default() += 1;
        }

        assert_eq!(counts.len(), 3);
        for (address, count) in counts {
            assert!(
                (800..=1200).contains(&count),
                "{address} selected {count} times"
            );
        }
    }
}
