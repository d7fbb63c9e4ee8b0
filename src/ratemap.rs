//! Piecewise-constant per-base rates along the genome.

use crate::error::{Error, Result};
use crate::intervals::Interval;

/// Rates over the half-open intervals `[position[i], position[i + 1])`.
#[derive(Clone, Debug, PartialEq)]
pub struct RateMap {
    position: Vec<f64>,
    rate: Vec<f64>,
}

impl RateMap {
    pub fn new(position: Vec<f64>, rate: Vec<f64>) -> Result<Self> {
        let error = |message: &str| Error::RateMap {
            message: message.to_string(),
        };
        if position.len() < 2 {
            return Err(error("need at least two positions"));
        }
        if position[0] != 0.0 {
            return Err(error("first position must be 0"));
        }
        if rate.len() + 1 != position.len() {
            return Err(error("need exactly one rate per interval"));
        }
        if !position.windows(2).all(|w| w[0] < w[1]) {
            return Err(error("positions must be strictly increasing"));
        }
        if rate.iter().any(|r| !r.is_finite() || *r < 0.0) {
            return Err(error("rates must be finite and non-negative"));
        }
        Ok(Self { position, rate })
    }

    /// A single rate along `[0, sequence_length)`.
    pub fn uniform(sequence_length: f64, rate: f64) -> Result<Self> {
        Self::new(vec![0.0, sequence_length], vec![rate])
    }

    pub fn sequence_length(&self) -> f64 {
        self.position[self.position.len() - 1]
    }

    pub fn num_intervals(&self) -> usize {
        self.rate.len()
    }

    pub fn position(&self) -> &[f64] {
        &self.position
    }

    pub fn rate(&self) -> &[f64] {
        &self.rate
    }

    /// `(left, right, rate)` for each interval.
    pub fn intervals(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        self.position
            .windows(2)
            .zip(self.rate.iter())
            .map(|(w, r)| (w[0], w[1], *r))
    }

    pub fn total_mass(&self) -> f64 {
        self.intervals().map(|(l, r, rate)| (r - l) * rate).sum()
    }

    /// Integral of the rate over `[left, right)`.
    pub fn mass_between(&self, left: f64, right: f64) -> f64 {
        self.intervals()
            .map(|(l, r, rate)| {
                let overlap = right.min(r) - left.max(l);
                if overlap > 0.0 {
                    overlap * rate
                } else {
                    0.0
                }
            })
            .sum()
    }
}

fn in_any(intervals: &[Interval], x: i64) -> bool {
    intervals.iter().any(|i| i.contains(x))
}

/// Build the mutation rate map from gene and intergene intervals.
///
/// Interval bounds are inclusive, so each interval covers `[start, stop + 1)`.
/// Bounds are clamped to `[0, sequence_length]`. Each segment between
/// breakpoints takes the gene rate if its midpoint lies in a gene, else the
/// intergene rate if the midpoint lies in an intergene interval, else zero.
pub fn make_rate_map(
    sequence_length: i64,
    gene_intervals: &[Interval],
    intergene_intervals: &[Interval],
    gene_rate: f64,
    intergene_rate: f64,
) -> Result<RateMap> {
    if sequence_length <= 0 {
        return Err(Error::RateMap {
            message: format!("sequence length must be positive, got {sequence_length}"),
        });
    }
    let clamp = |x: i64| x.clamp(0, sequence_length);

    let mut breaks = vec![0, sequence_length];
    for i in gene_intervals.iter().chain(intergene_intervals.iter()) {
        breaks.push(clamp(i.start));
        breaks.push(clamp(i.stop.saturating_add(1)));
    }
    breaks.sort_unstable();
    breaks.dedup();

    let mut rates = Vec::with_capacity(breaks.len() - 1);
    for w in breaks.windows(2) {
        let mid = (w[0] + w[1]).div_euclid(2);
        if in_any(gene_intervals, mid) {
            rates.push(gene_rate);
        } else if in_any(intergene_intervals, mid) {
            rates.push(intergene_rate);
        } else {
            rates.push(0.0);
        }
    }

    RateMap::new(breaks.into_iter().map(|b| b as f64).collect(), rates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_genes_and_intergenes() {
        let genes = [Interval::new(0, 99), Interval::new(200, 299)];
        let inter = [Interval::new(100, 199), Interval::new(300, 399)];
        let map = make_rate_map(400, &genes, &inter, 1e-3, 1e-4).unwrap();
        assert_eq!(map.position(), &[0., 100., 200., 300., 400.]);
        assert_eq!(map.rate(), &[1e-3, 1e-4, 1e-3, 1e-4]);
    }

    #[test]
    fn test_gaps_get_zero_rate() {
        let genes = [Interval::new(10, 19)];
        let map = make_rate_map(50, &genes, &[], 2.0, 1.0).unwrap();
        assert_eq!(map.position(), &[0., 10., 20., 50.]);
        assert_eq!(map.rate(), &[0., 2., 0.]);
        assert_eq!(map.total_mass(), 20.0);
    }

    #[test]
    fn test_genes_win_over_intergenes() {
        let genes = [Interval::new(0, 9)];
        let inter = [Interval::new(0, 19)];
        let map = make_rate_map(20, &genes, &inter, 5.0, 1.0).unwrap();
        assert_eq!(map.rate(), &[5.0, 1.0]);
    }

    #[test]
    fn test_clamping() {
        let genes = [Interval::new(-10, 5), Interval::new(15, 1000)];
        let map = make_rate_map(20, &genes, &[], 1.0, 0.0).unwrap();
        assert_eq!(map.position(), &[0., 6., 15., 20.]);
        assert_eq!(map.rate(), &[1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_no_intervals() {
        let map = make_rate_map(100, &[], &[], 1.0, 1.0).unwrap();
        assert_eq!(map.num_intervals(), 1);
        assert_eq!(map.total_mass(), 0.0);
    }

    #[test]
    fn test_bad_sequence_length() {
        assert!(make_rate_map(0, &[], &[], 1.0, 1.0).is_err());
    }

    #[test]
    fn test_negative_rate_rejected() {
        let genes = [Interval::new(0, 9)];
        assert!(make_rate_map(10, &genes, &[], -1.0, 1.0).is_err());
    }

    #[test]
    fn test_validation() {
        assert!(RateMap::new(vec![0.0], vec![]).is_err());
        assert!(RateMap::new(vec![1.0, 2.0], vec![1.0]).is_err());
        assert!(RateMap::new(vec![0.0, 2.0, 2.0], vec![1.0, 1.0]).is_err());
        assert!(RateMap::new(vec![0.0, 2.0], vec![f64::NAN]).is_err());
        assert!(RateMap::new(vec![0.0, 2.0], vec![1.0, 1.0]).is_err());
        assert!(RateMap::uniform(10.0, 0.5).is_ok());
    }

    #[test]
    fn test_mass_between() {
        let map = RateMap::new(vec![0., 10., 20.], vec![1.0, 3.0]).unwrap();
        assert_eq!(map.mass_between(5., 15.), 5.0 + 15.0);
        assert_eq!(map.mass_between(0., 20.), map.total_mass());
        assert_eq!(map.mass_between(12., 12.), 0.0);
    }

    fn naive_rate_at(x: i64, genes: &[Interval], inter: &[Interval], g: f64, i: f64) -> f64 {
        if in_any(genes, x) {
            g
        } else if in_any(inter, x) {
            i
        } else {
            0.0
        }
    }

    fn intervals_strategy() -> impl Strategy<Value = Vec<Interval>> {
        prop::collection::vec((0..200_i64, 0..50_i64), 0..6).prop_map(|v| {
            v.into_iter()
                .map(|(start, len)| Interval::new(start, start + len))
                .collect()
        })
    }

    proptest! {
        // Every interval bound is a breakpoint, so each base
        // gets the rate a direct lookup would give it.
        #[test]
        fn test_rate_per_base(genes in intervals_strategy(),
                              inter in intervals_strategy()) {
            let length = 250;
            let map = make_rate_map(length, &genes, &inter, 2.0, 1.0).unwrap();
            prop_assert_eq!(map.sequence_length(), length as f64);
            for (left, right, rate) in map.intervals() {
                for x in (left as i64)..(right as i64) {
                    prop_assert_eq!(rate, naive_rate_at(x, &genes, &inter, 2.0, 1.0));
                }
            }
        }
    }
}
