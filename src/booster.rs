// Gradient-boosted regression trees with squared-error loss.
//
// Each round fits a depth-limited tree to the current residuals using exact
// greedy splits and L2-regularized leaf weights, then adds it to the
// ensemble scaled by the learning rate. Training is deterministic for a
// given seed.
use crate::config::BoosterParams;
use log::trace;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict(&self, x: &[f64]) -> f64 {
        self.predict_by(|f| x[f])
    }

    fn predict_by(&self, value: impl Fn(usize) -> f64) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                Node::Leaf(w) => return w,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => idx = if value(feature) < threshold { left } else { right },
            }
        }
    }
}

/// A fitted ensemble.
#[derive(Debug, Clone, PartialEq)]
pub struct BoostedTrees {
    base_score: f64,
    learning_rate: f64,
    n_features: usize,
    trees: Vec<Tree>,
}

impl BoostedTrees {
    /// Fit on row-major `x` (one `Vec` per sample) against `y`.
    ///
    /// Callers guarantee `x.len() == y.len()`, a non-empty sample and equal
    /// row widths.
    pub fn fit(params: &BoosterParams, x: &[Vec<f64>], y: &[f64]) -> Self {
        let n = y.len();
        let n_features = x.first().map_or(0, Vec::len);
        let columns: Vec<Vec<f64>> = (0..n_features)
            .map(|f| x.iter().map(|row| row[f]).collect())
            .collect();

        let base_score = y.iter().sum::<f64>() / n as f64;
        let mut pred = vec![base_score; n];
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut trees = Vec::with_capacity(params.n_estimators);

        let builder = TreeBuilder {
            columns: &columns,
            max_depth: params.max_depth,
            min_child_weight: params.min_child_weight,
            lambda: params.lambda,
        };

        for round in 0..params.n_estimators {
            let residuals: Vec<f64> = y.iter().zip(&pred).map(|(t, p)| t - p).collect();
            let sample = draw_sample(n, params.subsample, &mut rng);
            let tree = builder.build(&residuals, sample);
            for (i, p) in pred.iter_mut().enumerate() {
                *p += params.learning_rate * tree.predict_by(|f| columns[f][i]);
            }
            if log::log_enabled!(log::Level::Trace) {
                let mse = y
                    .iter()
                    .zip(&pred)
                    .map(|(t, p)| (t - p) * (t - p))
                    .sum::<f64>()
                    / n as f64;
                trace!("round {}: {} nodes, train mse {:.4}", round, tree.nodes.len(), mse);
            }
            trees.push(tree);
        }

        BoostedTrees {
            base_score,
            learning_rate: params.learning_rate,
            n_features,
            trees,
        }
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        debug_assert_eq!(x.len(), self.n_features);
        self.base_score
            + self.learning_rate * self.trees.iter().map(|t| t.predict(x)).sum::<f64>()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

fn draw_sample(n: usize, subsample: f64, rng: &mut StdRng) -> Vec<usize> {
    if subsample >= 1.0 {
        return (0..n).collect();
    }
    let picked: Vec<usize> = (0..n).filter(|_| rng.gen::<f64>() < subsample).collect();
    if picked.is_empty() {
        vec![rng.gen_range(0..n)]
    } else {
        picked
    }
}

struct TreeBuilder<'a> {
    columns: &'a [Vec<f64>],
    max_depth: usize,
    min_child_weight: f64,
    lambda: f64,
}

struct BestSplit {
    gain: f64,
    feature: usize,
    threshold: f64,
}

impl TreeBuilder<'_> {
    fn build(&self, residuals: &[f64], sample: Vec<usize>) -> Tree {
        let mut nodes = Vec::new();
        self.grow(residuals, sample, 0, &mut nodes);
        Tree { nodes }
    }

    fn leaf_weight(&self, sum: f64, count: usize) -> f64 {
        sum / (count as f64 + self.lambda)
    }

    fn score(&self, sum: f64, count: f64) -> f64 {
        sum * sum / (count + self.lambda)
    }

    fn grow(
        &self,
        residuals: &[f64],
        idx: Vec<usize>,
        depth: usize,
        nodes: &mut Vec<Node>,
    ) -> usize {
        let id = nodes.len();
        let total: f64 = idx.iter().map(|&i| residuals[i]).sum();
        nodes.push(Node::Leaf(self.leaf_weight(total, idx.len())));

        if depth >= self.max_depth || idx.len() < 2 {
            return id;
        }
        let Some(best) = self.best_split(residuals, &idx, total) else {
            return id;
        };

        let column = &self.columns[best.feature];
        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) =
            idx.into_iter().partition(|&i| column[i] < best.threshold);
        let left = self.grow(residuals, left_idx, depth + 1, nodes);
        let right = self.grow(residuals, right_idx, depth + 1, nodes);
        nodes[id] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        id
    }

    fn best_split(&self, residuals: &[f64], idx: &[usize], total: f64) -> Option<BestSplit> {
        let n = idx.len() as f64;
        let parent = self.score(total, n);
        let mut best: Option<BestSplit> = None;
        let mut order = idx.to_vec();

        for (feature, column) in self.columns.iter().enumerate() {
            order.sort_by(|&a, &b| column[a].partial_cmp(&column[b]).unwrap_or(Ordering::Equal));
            let mut left_sum = 0.0;
            for pos in 0..order.len() - 1 {
                left_sum += residuals[order[pos]];
                let (here, next) = (column[order[pos]], column[order[pos + 1]]);
                if here == next {
                    continue;
                }
                let left_n = (pos + 1) as f64;
                let right_n = n - left_n;
                if left_n < self.min_child_weight || right_n < self.min_child_weight {
                    continue;
                }
                let gain = self.score(left_sum, left_n) + self.score(total - left_sum, right_n)
                    - parent;
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(BestSplit {
                        gain,
                        feature,
                        threshold: here + (next - here) / 2.0,
                    });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn params(n_estimators: usize) -> BoosterParams {
        BoosterParams {
            n_estimators,
            learning_rate: 0.3,
            max_depth: 3,
            min_child_weight: 1.0,
            lambda: 0.0,
            subsample: 1.0,
            seed: 7,
        }
    }

    #[test]
    fn learns_a_step_function() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..20).map(|i| if i < 10 { 1.0 } else { 5.0 }).collect();
        let model = BoostedTrees::fit(&params(50), &x, &y);

        assert_eq!(model.n_trees(), 50);
        assert_relative_eq!(model.predict(&[2.0]), 1.0, epsilon = 1e-3);
        assert_relative_eq!(model.predict(&[15.0]), 5.0, epsilon = 1e-3);
    }

    #[test]
    fn constant_target_predicts_the_constant() {
        let x: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64, 2.0 * i as f64]).collect();
        let y = vec![110.0; 5];
        let model = BoostedTrees::fit(&params(10), &x, &y);
        assert_relative_eq!(model.predict(&[100.0, -3.0]), 110.0);
    }

    #[test]
    fn single_sample_fits_its_target() {
        let model = BoostedTrees::fit(&BoosterParams::default(), &[vec![100.0]], &[110.0]);
        assert_relative_eq!(model.predict(&[110.0]), 110.0);
    }

    #[test]
    fn regularization_shrinks_leaves_toward_zero() {
        let x: Vec<Vec<f64>> = (0..4).map(|i| vec![i as f64]).collect();
        let y = vec![0.0, 0.0, 10.0, 10.0];
        let mut p = params(1);
        p.learning_rate = 1.0;
        p.lambda = 2.0;
        p.max_depth = 1;
        let model = BoostedTrees::fit(&p, &x, &y);
        // residuals -5,-5 | 5,5 ; leaf = 10 / (2 + 2)
        assert_relative_eq!(model.predict(&[3.0]), 5.0 + 2.5);
        assert_relative_eq!(model.predict(&[0.0]), 5.0 - 2.5);
    }

    #[test]
    fn same_seed_same_model() {
        let x: Vec<Vec<f64>> = (0..40).map(|i| vec![(i % 7) as f64, (i % 3) as f64]).collect();
        let y: Vec<f64> = x.iter().map(|r| r[0] * 2.0 - r[1]).collect();
        let mut p = params(20);
        p.subsample = 0.6;
        let a = BoostedTrees::fit(&p, &x, &y);
        let b = BoostedTrees::fit(&p, &x, &y);
        assert_eq!(a, b);
    }
}
