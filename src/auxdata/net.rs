//! Pretrained feed-forward regression model for surface-pressure retrieval.
//!
//! The model is an opaque artifact exercised only at inference time: weights
//! are immutable after loading, while the evaluation buffers live in a
//! [`NetScratch`] that every worker clones for itself, so concurrent tiles
//! never share mutable state.

use crate::types::{ScreenError, ScreenResult};

/// One fully connected layer: `n_out` rows of `n_in` weights plus a bias
/// per output node.
#[derive(Debug, Clone)]
struct Layer {
    n_in: usize,
    n_out: usize,
    weights: Vec<f64>,
    bias: Vec<f64>,
}

/// Immutable feed-forward regression net with sigmoid hidden layers and a
/// linear output layer. Inputs and outputs are min/max normalized with the
/// ranges stored in the model file.
#[derive(Debug, Clone)]
pub struct RegressionNet {
    sizes: Vec<usize>,
    input_ranges: Vec<(f64, f64)>,
    output_ranges: Vec<(f64, f64)>,
    layers: Vec<Layer>,
}

/// Per-worker evaluation buffers for [`RegressionNet::evaluate`]
#[derive(Debug, Clone)]
pub struct NetScratch {
    a: Vec<f64>,
    b: Vec<f64>,
}

impl RegressionNet {
    /// Parse a regression model from its text resource.
    ///
    /// Format: one line of layer sizes (inputs first, outputs last), one
    /// `min max` line per input, one per output, then per layer transition
    /// a bias line followed by one weight line per output node.
    pub fn parse(text: &str) -> ScreenResult<Self> {
        let mut lines = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'));

        let sizes = parse_row::<usize>(next_line(&mut lines, "layer sizes")?)?;
        if sizes.len() < 2 {
            return Err(ScreenError::AuxData(
                "regression model needs at least an input and an output layer".to_string(),
            ));
        }

        let n_in = sizes[0];
        let n_out = *sizes.last().unwrap();
        let mut input_ranges = Vec::with_capacity(n_in);
        for _ in 0..n_in {
            input_ranges.push(parse_range(next_line(&mut lines, "input range")?)?);
        }
        let mut output_ranges = Vec::with_capacity(n_out);
        for _ in 0..n_out {
            output_ranges.push(parse_range(next_line(&mut lines, "output range")?)?);
        }

        let mut layers = Vec::with_capacity(sizes.len() - 1);
        for t in 0..sizes.len() - 1 {
            let (rows, cols) = (sizes[t + 1], sizes[t]);
            let bias = parse_row::<f64>(next_line(&mut lines, "bias row")?)?;
            if bias.len() != rows {
                return Err(ScreenError::AuxData(format!(
                    "layer {} bias row has {} values, expected {}",
                    t,
                    bias.len(),
                    rows
                )));
            }
            let mut weights = Vec::with_capacity(rows * cols);
            for _ in 0..rows {
                let row = parse_row::<f64>(next_line(&mut lines, "weight row")?)?;
                if row.len() != cols {
                    return Err(ScreenError::AuxData(format!(
                        "layer {} weight row has {} values, expected {}",
                        t,
                        row.len(),
                        cols
                    )));
                }
                weights.extend(row);
            }
            layers.push(Layer { n_in: cols, n_out: rows, weights, bias });
        }

        log::debug!(
            "Loaded regression model: {} layers, topology {:?}",
            layers.len(),
            sizes
        );
        Ok(Self { sizes, input_ranges, output_ranges, layers })
    }

    /// Build a model directly from weight matrices (row-major, one matrix
    /// and bias vector per layer transition).
    pub fn from_parts(
        sizes: Vec<usize>,
        input_ranges: Vec<(f64, f64)>,
        output_ranges: Vec<(f64, f64)>,
        weights: Vec<Vec<f64>>,
        biases: Vec<Vec<f64>>,
    ) -> ScreenResult<Self> {
        if weights.len() != sizes.len() - 1 || biases.len() != sizes.len() - 1 {
            return Err(ScreenError::AuxData(
                "layer count does not match size list".to_string(),
            ));
        }
        let mut layers = Vec::with_capacity(weights.len());
        for (t, (w, b)) in weights.into_iter().zip(biases).enumerate() {
            let (rows, cols) = (sizes[t + 1], sizes[t]);
            if w.len() != rows * cols || b.len() != rows {
                return Err(ScreenError::AuxData(format!(
                    "layer {} has inconsistent weight or bias shape",
                    t
                )));
            }
            layers.push(Layer { n_in: cols, n_out: rows, weights: w, bias: b });
        }
        Ok(Self { sizes, input_ranges, output_ranges, layers })
    }

    pub fn num_inputs(&self) -> usize {
        self.sizes[0]
    }

    /// Allocate evaluation buffers for one worker
    pub fn scratch(&self) -> NetScratch {
        let widest = self.sizes.iter().copied().max().unwrap_or(0);
        NetScratch { a: vec![0.0; widest], b: vec![0.0; widest] }
    }

    /// Run the model on one input vector, returning the first output.
    pub fn evaluate(&self, input: &[f64], scratch: &mut NetScratch) -> f64 {
        debug_assert_eq!(input.len(), self.num_inputs());

        for (i, &x) in input.iter().enumerate() {
            let (lo, hi) = self.input_ranges[i];
            scratch.a[i] = if hi > lo { (x - lo) / (hi - lo) } else { x };
        }

        let last = self.layers.len() - 1;
        for (t, layer) in self.layers.iter().enumerate() {
            for j in 0..layer.n_out {
                let row = &layer.weights[j * layer.n_in..(j + 1) * layer.n_in];
                let mut acc = layer.bias[j];
                for (i, &w) in row.iter().enumerate() {
                    acc += w * scratch.a[i];
                }
                scratch.b[j] = if t < last { sigmoid(acc) } else { acc };
            }
            std::mem::swap(&mut scratch.a, &mut scratch.b);
        }

        let (lo, hi) = self.output_ranges[0];
        lo + scratch.a[0] * (hi - lo)
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn next_line<'a>(
    lines: &mut impl Iterator<Item = &'a str>,
    what: &str,
) -> ScreenResult<&'a str> {
    lines
        .next()
        .ok_or_else(|| ScreenError::AuxData(format!("regression model truncated at {}", what)))
}

fn parse_row<T: std::str::FromStr>(line: &str) -> ScreenResult<Vec<T>> {
    line.split_whitespace()
        .map(|tok| {
            tok.parse::<T>()
                .map_err(|_| ScreenError::AuxData(format!("bad numeric token '{}'", tok)))
        })
        .collect()
}

fn parse_range(line: &str) -> ScreenResult<(f64, f64)> {
    let row = parse_row::<f64>(line)?;
    if row.len() != 2 {
        return Err(ScreenError::AuxData(format!(
            "expected 'min max' pair, got {} values",
            row.len()
        )));
    }
    Ok((row[0], row[1]))
}
