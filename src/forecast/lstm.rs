//! Stacked LSTM regressor (many-to-one) with a linear head, trained by
//! full backpropagation through time and Adam. Gate layout follows the usual i, f, g, o order.

use ndarray::{s, Array, Array1, Array2, Array3, Axis, Dimension, Zip};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn uniform_matrix(rows: usize, cols: usize, bound: f64, rng: &mut StdRng) -> Array2<f64> {
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-bound..bound))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LstmLayer {
    hidden: usize,
    /// (4H, input)
    w_ih: Array2<f64>,
    /// (4H, H)
    w_hh: Array2<f64>,
    bias: Array1<f64>,
}

#[derive(Debug, Clone)]
struct LayerGrads {
    w_ih: Array2<f64>,
    w_hh: Array2<f64>,
    bias: Array1<f64>,
}

struct LayerCache {
    inputs: Vec<Array2<f64>>,
    /// `h[t]` is the state before step t; `h[0]` is zeros.
    h: Vec<Array2<f64>>,
    c: Vec<Array2<f64>>,
    i: Vec<Array2<f64>>,
    f: Vec<Array2<f64>>,
    g: Vec<Array2<f64>>,
    o: Vec<Array2<f64>>,
}

impl LstmLayer {
    fn new(input: usize, hidden: usize, rng: &mut StdRng) -> Self {
        let bound = 1.0 / (hidden as f64).sqrt();
        Self {
            hidden,
            w_ih: uniform_matrix(4 * hidden, input, bound, rng),
            w_hh: uniform_matrix(4 * hidden, hidden, bound, rng),
            bias: Array1::from_shape_fn(4 * hidden, |_| rng.gen_range(-bound..bound)),
        }
    }

    fn zero_grads(&self) -> LayerGrads {
        LayerGrads {
            w_ih: Array2::zeros(self.w_ih.raw_dim()),
            w_hh: Array2::zeros(self.w_hh.raw_dim()),
            bias: Array1::zeros(self.bias.raw_dim()),
        }
    }

    fn forward(&self, inputs: &[Array2<f64>]) -> (Vec<Array2<f64>>, LayerCache) {
        let batch = inputs.first().map(|x| x.nrows()).unwrap_or(0);
        let hd = self.hidden;
        let mut cache = LayerCache {
            inputs: inputs.to_vec(),
            h: vec![Array2::zeros((batch, hd))],
            c: vec![Array2::zeros((batch, hd))],
            i: Vec::with_capacity(inputs.len()),
            f: Vec::with_capacity(inputs.len()),
            g: Vec::with_capacity(inputs.len()),
            o: Vec::with_capacity(inputs.len()),
        };
        let mut outputs = Vec::with_capacity(inputs.len());

        for x in inputs {
            let h_prev = &cache.h[cache.h.len() - 1];
            let c_prev = &cache.c[cache.c.len() - 1];
            let pre = x.dot(&self.w_ih.t()) + h_prev.dot(&self.w_hh.t()) + &self.bias;
            let i = pre.slice(s![.., 0..hd]).mapv(sigmoid);
            let f = pre.slice(s![.., hd..2 * hd]).mapv(sigmoid);
            let g = pre.slice(s![.., 2 * hd..3 * hd]).mapv(f64::tanh);
            let o = pre.slice(s![.., 3 * hd..4 * hd]).mapv(sigmoid);
            let c = &f * c_prev + &i * &g;
            let h = &o * &c.mapv(f64::tanh);

            outputs.push(h.clone());
            cache.h.push(h);
            cache.c.push(c);
            cache.i.push(i);
            cache.f.push(f);
            cache.g.push(g);
            cache.o.push(o);
        }

        (outputs, cache)
    }

    /// Backpropagates `d_outputs` (one per step) through time. Returns weight
    /// gradients and the gradient with respect to each step's input.
    fn backward(&self, cache: &LayerCache, d_outputs: &[Array2<f64>]) -> (LayerGrads, Vec<Array2<f64>>) {
        let steps = cache.inputs.len();
        let hd = self.hidden;
        let batch = cache.h[0].nrows();
        let mut grads = self.zero_grads();
        let mut d_inputs = vec![Array2::<f64>::zeros((batch, self.w_ih.ncols())); steps];
        let mut dh_next = Array2::<f64>::zeros((batch, hd));
        let mut dc_next = Array2::<f64>::zeros((batch, hd));

        for t in (0..steps).rev() {
            let (i, f, g, o) = (&cache.i[t], &cache.f[t], &cache.g[t], &cache.o[t]);
            let c = &cache.c[t + 1];
            let c_prev = &cache.c[t];
            let h_prev = &cache.h[t];
            let tanh_c = c.mapv(f64::tanh);

            let dh = &d_outputs[t] + &dh_next;
            let d_o = &dh * &tanh_c;
            let dc = &dh * o * &tanh_c.mapv(|v| 1.0 - v * v) + &dc_next;
            let d_i = &dc * g;
            let d_g = &dc * i;
            let d_f = &dc * c_prev;
            dc_next = &dc * f;

            let mut d_pre = Array2::<f64>::zeros((batch, 4 * hd));
            d_pre
                .slice_mut(s![.., 0..hd])
                .assign(&(&d_i * &i.mapv(|v| v * (1.0 - v))));
            d_pre
                .slice_mut(s![.., hd..2 * hd])
                .assign(&(&d_f * &f.mapv(|v| v * (1.0 - v))));
            d_pre
                .slice_mut(s![.., 2 * hd..3 * hd])
                .assign(&(&d_g * &g.mapv(|v| 1.0 - v * v)));
            d_pre
                .slice_mut(s![.., 3 * hd..4 * hd])
                .assign(&(&d_o * &o.mapv(|v| v * (1.0 - v))));

            grads.w_ih += &d_pre.t().dot(&cache.inputs[t]);
            grads.w_hh += &d_pre.t().dot(h_prev);
            grads.bias += &d_pre.sum_axis(Axis(0));
            d_inputs[t] = d_pre.dot(&self.w_ih);
            dh_next = d_pre.dot(&self.w_hh);
        }

        (grads, d_inputs)
    }
}

/// Gradients (and Adam moments) shaped like the network's parameters.
#[derive(Debug, Clone)]
pub struct NetworkGrads {
    layers: Vec<LayerGrads>,
    head_w: Array2<f64>,
    head_b: Array1<f64>,
}

pub struct AdamState {
    learning_rate: f64,
    step: i32,
    m: NetworkGrads,
    v: NetworkGrads,
}

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-8;

impl AdamState {
    pub fn new(network: &LstmNetwork, learning_rate: f64) -> Self {
        Self {
            learning_rate,
            step: 0,
            m: network.zero_grads(),
            v: network.zero_grads(),
        }
    }
}

fn adam_update<D: Dimension>(
    param: &mut Array<f64, D>,
    grad: &Array<f64, D>,
    m: &mut Array<f64, D>,
    v: &mut Array<f64, D>,
    lr: f64,
    bias1: f64,
    bias2: f64,
) {
    Zip::from(param)
        .and(grad)
        .and(m)
        .and(v)
        .for_each(|p, &g, m, v| {
            *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
            *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
            let m_hat = *m / bias1;
            let v_hat = *v / bias2;
            *p -= lr * m_hat / (v_hat.sqrt() + ADAM_EPSILON);
        });
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmNetwork {
    layers: Vec<LstmLayer>,
    /// (1, H)
    head_w: Array2<f64>,
    head_b: Array1<f64>,
    dropout: f64,
}

impl LstmNetwork {
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        num_layers: usize,
        dropout: f64,
        rng: &mut StdRng,
    ) -> Self {
        let mut layers = Vec::with_capacity(num_layers);
        for idx in 0..num_layers.max(1) {
            let input = if idx == 0 { input_size } else { hidden_size };
            layers.push(LstmLayer::new(input, hidden_size, rng));
        }
        let bound = 1.0 / (hidden_size as f64).sqrt();
        Self {
            layers,
            head_w: uniform_matrix(1, hidden_size, bound, rng),
            head_b: Array1::from_shape_fn(1, |_| rng.gen_range(-bound..bound)),
            dropout,
        }
    }

    fn zero_grads(&self) -> NetworkGrads {
        NetworkGrads {
            layers: self.layers.iter().map(LstmLayer::zero_grads).collect(),
            head_w: Array2::zeros(self.head_w.raw_dim()),
            head_b: Array1::zeros(self.head_b.raw_dim()),
        }
    }

    fn time_steps(x: &Array3<f64>) -> Vec<Array2<f64>> {
        (0..x.len_of(Axis(1)))
            .map(|t| x.slice(s![.., t, ..]).to_owned())
            .collect()
    }

    fn dropout_mask(&self, shape: (usize, usize), rng: &mut StdRng) -> Array2<f64> {
        let keep = 1.0 - self.dropout;
        Array2::from_shape_fn(shape, |_| {
            if rng.gen::<f64>() < self.dropout {
                0.0
            } else {
                1.0 / keep
            }
        })
    }

    /// Inference on `(batch, steps, features)`; dropout disabled.
    pub fn predict(&self, x: &Array3<f64>) -> Array1<f64> {
        let mut inputs = Self::time_steps(x);
        for layer in &self.layers {
            inputs = layer.forward(&inputs).0;
        }
        let Some(last) = inputs.last() else {
            return Array1::zeros(x.len_of(Axis(0)));
        };
        last.dot(&self.head_w.t()).column(0).mapv(|v| v + self.head_b[0])
    }

    /// One optimizer step on a mini-batch; returns the batch MSE before the update.
    pub fn train_batch(
        &mut self,
        x: &Array3<f64>,
        y: &Array1<f64>,
        adam: &mut AdamState,
        rng: &mut StdRng,
    ) -> f64 {
        let batch = x.len_of(Axis(0));
        if batch == 0 {
            return 0.0;
        }
        let use_dropout = self.dropout > 0.0;

        let mut inputs = Self::time_steps(x);
        let mut caches = Vec::with_capacity(self.layers.len());
        let mut masks: Vec<Vec<Array2<f64>>> = Vec::with_capacity(self.layers.len());
        let last_layer = self.layers.len() - 1;
        for (idx, layer) in self.layers.iter().enumerate() {
            let (mut outputs, cache) = layer.forward(&inputs);
            let mut layer_masks = Vec::new();
            if idx < last_layer && use_dropout {
                for out in outputs.iter_mut() {
                    let mask = self.dropout_mask(out.dim(), rng);
                    *out *= &mask;
                    layer_masks.push(mask);
                }
            }
            caches.push(cache);
            masks.push(layer_masks);
            inputs = outputs;
        }

        let steps = inputs.len();
        let h_last = &inputs[steps - 1];
        let head_mask = if use_dropout {
            self.dropout_mask(h_last.dim(), rng)
        } else {
            Array2::ones(h_last.dim())
        };
        let h_drop = h_last * &head_mask;
        let out = h_drop.dot(&self.head_w.t()).column(0).mapv(|v| v + self.head_b[0]);
        let err = &out - y;
        let loss = err.mapv(|e| e * e).sum() / batch as f64;

        let mut grads = self.zero_grads();
        let d_out = err.mapv(|e| 2.0 * e / batch as f64).insert_axis(Axis(1));
        grads.head_w = d_out.t().dot(&h_drop);
        grads.head_b = d_out.sum_axis(Axis(0));
        let d_h_last = d_out.dot(&self.head_w) * &head_mask;

        let hidden = h_last.ncols();
        let mut d_outputs = vec![Array2::<f64>::zeros((batch, hidden)); steps];
        d_outputs[steps - 1] = d_h_last;
        for idx in (0..self.layers.len()).rev() {
            let (layer_grads, mut d_inputs) = self.layers[idx].backward(&caches[idx], &d_outputs);
            grads.layers[idx] = layer_grads;
            if idx > 0 {
                for (d, mask) in d_inputs.iter_mut().zip(masks[idx - 1].iter()) {
                    *d *= mask;
                }
                d_outputs = d_inputs;
            }
        }

        self.apply(&grads, adam);
        loss
    }

    fn apply(&mut self, grads: &NetworkGrads, adam: &mut AdamState) {
        adam.step += 1;
        let bias1 = 1.0 - ADAM_BETA1.powi(adam.step);
        let bias2 = 1.0 - ADAM_BETA2.powi(adam.step);
        let lr = adam.learning_rate;
        for (idx, layer) in self.layers.iter_mut().enumerate() {
            let g = &grads.layers[idx];
            let m = &mut adam.m.layers[idx];
            let v = &mut adam.v.layers[idx];
            adam_update(&mut layer.w_ih, &g.w_ih, &mut m.w_ih, &mut v.w_ih, lr, bias1, bias2);
            adam_update(&mut layer.w_hh, &g.w_hh, &mut m.w_hh, &mut v.w_hh, lr, bias1, bias2);
            adam_update(&mut layer.bias, &g.bias, &mut m.bias, &mut v.bias, lr, bias1, bias2);
        }
        adam_update(
            &mut self.head_w,
            &grads.head_w,
            &mut adam.m.head_w,
            &mut adam.v.head_w,
            lr,
            bias1,
            bias2,
        );
        adam_update(
            &mut self.head_b,
            &grads.head_b,
            &mut adam.m.head_b,
            &mut adam.v.head_b,
            lr,
            bias1,
            bias2,
        );
    }
}

pub fn mse(predicted: &Array1<f64>, actual: &Array1<f64>) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    (predicted - actual).mapv(|e| e * e).sum() / actual.len() as f64
}
