//! Rank-based weights over the combined score matrix.
//!
//! Row side: per experimental image, the retained top entries among its
//! `2 * references` scores get `1 - rank / row_length`.
//! Column side: per reference, every entry among its `2 * experimentals`
//! scores gets `1 - rank / column_length`.
//! Both walks stop at the first negative score. The final weight is the
//! product, so a pair must survive both sides.


use crate::config::Retention;
use crate::scores::CombinedScores;

/// Indices of `values` ordered by descending value. Ties keep index order.
pub fn rank_descending(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    order
}

/// Row-side weights, laid out like the combined row view.
pub fn row_weights(combined: &CombinedScores, retention: &Retention) -> Vec<f64> {
    let width = combined.width();
    let retained = retention.retained(width);
    let mut weights = vec![0.0; combined.experimentals() * width];

    for (i, out) in weights.chunks_exact_mut(width).enumerate() {
        let row = combined.row(i);
        for (rank, &index) in rank_descending(row).iter().take(retained).enumerate() {
            if row[index] < 0.0 {
                break;
            }
            out[index] = 1.0 - rank as f64 / width as f64;
        }
    }
    weights
}

/// Column-side weights, laid out like the combined row view.
pub fn column_weights(combined: &CombinedScores) -> Vec<f64> {
    let experimentals = combined.experimentals();
    let references = combined.references();
    let width = combined.width();
    let length = 2 * experimentals;
    let mut weights = vec![0.0; experimentals * width];

    for r in 0..references {
        let column = combined.column(r);
        for (rank, &index) in rank_descending(&column).iter().enumerate() {
            if column[index] < 0.0 {
                break;
            }
            let (i, c) = if index < experimentals {
                (index, r)
            } else {
                (index - experimentals, r + references)
            };
            weights[i * width + c] = 1.0 - rank as f64 / length as f64;
        }
    }
    weights
}

/// Final weight per (experimental, combined reference column).
#[derive(Debug, Clone, PartialEq)]
pub struct WeightMatrix {
    experimentals: usize,
    references: usize,
    data: Vec<f64>,
}

impl WeightMatrix {
    pub fn compute(combined: &CombinedScores, retention: &Retention) -> Self {
        let rows = row_weights(combined, retention);
        let columns = column_weights(combined);
        let data = rows.iter().zip(&columns).map(|(r, c)| r * c).collect();
        Self {
            experimentals: combined.experimentals(),
            references: combined.references(),
            data,
        }
    }

    #[inline]
    pub fn experimentals(&self) -> usize {
        self.experimentals
    }

    #[inline]
    pub fn references(&self) -> usize {
        self.references
    }

    /// Weight of `experimental` for `reference`, in the mirrored channel if `mirror`.
    #[inline]
    pub fn get(&self, experimental: usize, reference: usize, mirror: bool) -> f64 {
        let column = if mirror {
            reference + self.references
        } else {
            reference
        };
        self.data[experimental * 2 * self.references + column]
    }

    pub fn row(&self, experimental: usize) -> &[f64] {
        let width = 2 * self.references;
        &self.data[experimental * width..(experimental + 1) * width]
    }

    /// Nonzero entries for `reference` as `(experimental, mirror, weight)`,
    /// in experimental order with the original before the mirror.
    pub fn contributors(&self, reference: usize) -> impl Iterator<Item = (usize, bool, f64)> + '_ {
        (0..self.experimentals).flat_map(move |i| {
            [false, true].into_iter().filter_map(move |mirror| {
                let w = self.get(i, reference, mirror);
                (w != 0.0).then_some((i, mirror, w))
            })
        })
    }
}
