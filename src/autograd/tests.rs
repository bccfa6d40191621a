use std::sync::Arc;

use super::*;

fn m(rows: usize, cols: usize, data: &[f32]) -> Matrix {
    Matrix::from_vec(rows, cols, data.to_vec()).unwrap()
}

/// Compare analytic gradients of `f` against central finite differences.
fn grad_check<F>(inputs: &[Matrix], f: F)
where
    F: Fn(&mut Tape, &[Var]) -> Var,
{
    let mut tape = Tape::new();
    let vars: Vec<Var> = inputs.iter().map(|x| tape.leaf(x.clone())).collect();
    let loss = f(&mut tape, &vars);
    let grads = tape.backward(loss).unwrap();

    let eval = |perturbed: &[Matrix]| {
        let mut t = Tape::new();
        let vs: Vec<Var> = perturbed.iter().map(|x| t.leaf(x.clone())).collect();
        let l = f(&mut t, &vs);
        t.value(l).item()
    };

    let eps = 1e-2f32;
    for (k, input) in inputs.iter().enumerate() {
        let analytic = grads
            .get(vars[k])
            .cloned()
            .unwrap_or_else(|| Matrix::zeros(input.rows(), input.cols()));
        for idx in 0..input.len() {
            let mut plus = inputs.to_vec();
            plus[k].data_mut()[idx] += eps;
            let mut minus = inputs.to_vec();
            minus[k].data_mut()[idx] -= eps;
            let numeric = (eval(&plus) - eval(&minus)) / (2.0 * eps);
            let a = analytic.data()[idx];
            assert!(
                (numeric - a).abs() <= 1e-2 + 2e-2 * a.abs(),
                "input {k} entry {idx}: analytic {a}, numeric {numeric}"
            );
        }
    }
}

#[test]
fn matmul_gradient() {
    let a = m(2, 3, &[0.5, -1.0, 2.0, 1.5, 0.3, -0.7]);
    let b = m(3, 2, &[1.0, 0.2, -0.4, 0.9, 0.6, -1.1]);
    grad_check(&[a, b], |t, v| {
        let p = t.matmul(v[0], v[1]).unwrap();
        let sq = t.mul(p, p).unwrap();
        t.sum(sq)
    });
}

#[test]
fn elementwise_gradients() {
    let a = m(2, 2, &[0.5, -1.0, 2.0, 1.5]);
    let b = m(2, 2, &[1.0, 0.2, -0.4, 0.9]);
    grad_check(&[a, b], |t, v| {
        let p = t.mul(v[0], v[1]).unwrap();
        let d = t.sub(p, v[0]).unwrap();
        let s = t.scale(d, 0.5);
        let s = t.add_scalar(s, 1.0);
        let s = t.add(s, v[1]).unwrap();
        let sq = t.mul(s, s).unwrap();
        t.mean(sq)
    });
}

#[test]
fn gather_and_row_norm_gradient() {
    let x = m(3, 2, &[0.5, -1.0, 2.0, 1.5, 0.3, -0.7]);
    grad_check(&[x], |t, v| {
        let g = t.gather_rows(v[0], vec![0, 2, 2]).unwrap();
        let n = t.row_norm(g);
        t.sum(n)
    });
}

#[test]
fn concat_gradient() {
    let a = m(1, 2, &[0.5, -1.0]);
    let b = m(2, 2, &[2.0, 1.5, 0.3, -0.7]);
    grad_check(&[a, b], |t, v| {
        let c = t.concat_rows(v[0], v[1]).unwrap();
        let n = t.row_norm(c);
        let w = t.gather_rows(n, vec![0, 2]).unwrap();
        t.sum(w)
    });
}

#[test]
fn activation_gradients() {
    let x = m(2, 3, &[0.5, -1.0, 2.0, -1.5, 0.3, -0.7]);
    grad_check(&[x], |t, v| {
        let a = t.leaky_relu(v[0], 0.2);
        let b = t.elu(v[0]);
        let c = t.relu(v[0]);
        let ab = t.mul(a, b).unwrap();
        let abc = t.add(ab, c).unwrap();
        t.sum(abc)
    });
}

#[test]
fn attention_aggregation_gradient() {
    let pattern = Arc::new(SparsePattern::new(3, vec![(0, 0), (0, 1), (0, 2), (1, 0), (2, 2)]).unwrap());
    let x = m(3, 2, &[0.5, -1.0, 2.0, 1.5, 0.3, -0.7]);
    let scores = m(5, 1, &[0.1, -0.4, 0.8, 0.3, 0.0]);
    grad_check(&[x, scores], |t, v| {
        let att = t.segment_softmax(&pattern, v[1]).unwrap();
        let out = t.spmm(&pattern, att, v[0]).unwrap();
        let sq = t.mul(out, out).unwrap();
        t.sum(sq)
    });
}

#[test]
fn segment_softmax_normalises_per_source() {
    let pattern = Arc::new(SparsePattern::new(2, vec![(0, 0), (0, 1), (1, 1)]).unwrap());
    let mut t = Tape::new();
    let s = t.constant(m(3, 1, &[1.0, 1.0, 5.0]));
    let y = t.segment_softmax(&pattern, s).unwrap();
    let v = t.value(y);
    assert!((v.get(0, 0) - 0.5).abs() < 1e-6);
    assert!((v.get(1, 0) - 0.5).abs() < 1e-6);
    assert!((v.get(2, 0) - 1.0).abs() < 1e-6);
}

#[test]
fn reused_variable_accumulates() {
    let mut t = Tape::new();
    let x = t.leaf(Matrix::scalar(3.0));
    let y = t.add(x, x).unwrap();
    let z = t.mul(y, x).unwrap();
    let grads = t.backward(z).unwrap();
    // z = 2x^2, dz/dx = 4x
    assert!((grads.get(x).unwrap().item() - 12.0).abs() < 1e-6);
}

#[test]
fn constants_receive_no_gradient() {
    let mut t = Tape::new();
    let x = t.leaf(Matrix::scalar(2.0));
    let c = t.constant(Matrix::scalar(5.0));
    let y = t.mul(x, c).unwrap();
    let grads = t.backward(y).unwrap();
    assert!(grads.get(c).is_none());
    assert_eq!(grads.get(x).unwrap().item(), 5.0);
}

#[test]
fn backward_requires_scalar() {
    let mut t = Tape::new();
    let x = t.leaf(Matrix::zeros(2, 2));
    assert!(matches!(
        t.backward(x),
        Err(TensorError::NonScalarLoss { shape: (2, 2) })
    ));
}
