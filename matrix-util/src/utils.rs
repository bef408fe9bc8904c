use rand::prelude::SliceRandom;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// A random number generator from an explicit seed, or from OS entropy
/// when no seed is given
pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_os_rng(),
    }
}

/// Keep a uniform random subset of `ntarget` elements, sorted
pub fn downsample(elems: &mut Vec<usize>, ntarget: usize, rng: &mut StdRng) {
    if elems.len() > ntarget {
        elems.shuffle(rng);
        elems.truncate(ntarget);
        elems.sort_unstable();
    }
}

/// Median of finite values (mean of the two middle values for an even count)
pub fn median(values: &[f32]) -> Option<f32> {
    let mut sorted: Vec<f32> = values.iter().copied().filter(|x| x.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    Some(if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median() {
        assert_eq!(median(&[1.0, 3.0, 2.0]), Some(2.0));
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), Some(2.5));
        assert_eq!(median(&[5.0]), Some(5.0));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_downsample_is_seeded() {
        let elems: Vec<usize> = (0..100).map(|i| 3 * i).collect();

        let mut a = elems.clone();
        let mut b = elems.clone();
        downsample(&mut a, 10, &mut seeded_rng(Some(5)));
        downsample(&mut b, 10, &mut seeded_rng(Some(5)));
        assert_eq!(a.len(), 10);
        assert_eq!(a, b);
        assert!(a.iter().all(|i| elems.contains(i)));
        assert!(a.windows(2).all(|w| w[0] < w[1]));

        let mut short = vec![4, 1, 2];
        downsample(&mut short, 10, &mut seeded_rng(Some(5)));
        assert_eq!(short, vec![4, 1, 2]);
    }
}
