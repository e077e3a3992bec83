//! Dense least squares via the normal equations.

/// Result of an ordinary least squares fit.
#[derive(Debug, Clone)]
pub struct LstsqFit {
    pub coef: Vec<f64>,
    /// Standard errors of `coef`.
    pub std_err: Vec<f64>,
    /// Residual sum of squares.
    pub ssr: f64,
    pub nobs: usize,
}

impl LstsqFit {
    pub fn t_value(&self, i: usize) -> f64 {
        self.coef[i] / self.std_err[i]
    }
}

/// Inverts a square row-major matrix with partial pivoting.
/// `None` when the matrix is (numerically) singular.
pub fn invert(mut a: Vec<Vec<f64>>) -> Option<Vec<Vec<f64>>> {
    let n = a.len();
    let mut inv: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();
    let scale = a
        .iter()
        .flat_map(|r| r.iter())
        .fold(0.0f64, |m, v| m.max(v.abs()));
    if scale == 0.0 || !scale.is_finite() {
        return None;
    }
    let tol = scale * 1e-12;

    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() <= tol {
            return None;
        }
        a.swap(col, pivot);
        inv.swap(col, pivot);

        let p = a[col][col];
        for j in 0..n {
            a[col][j] /= p;
            inv[col][j] /= p;
        }
        let pivot_row = a[col].clone();
        let pivot_inv = inv[col].clone();
        for row in 0..n {
            if row == col {
                continue;
            }
            let f = a[row][col];
            if f == 0.0 {
                continue;
            }
            for j in 0..n {
                a[row][j] -= f * pivot_row[j];
                inv[row][j] -= f * pivot_inv[j];
            }
        }
    }
    Some(inv)
}

/// Least squares `y ~ X` where `rows` are the observations of `X`.
///
/// Needs more observations than regressors. Returns `None` for a singular
/// design.
pub fn lstsq(rows: &[Vec<f64>], y: &[f64]) -> Option<LstsqFit> {
    let nobs = rows.len();
    let k = rows.first()?.len();
    if nobs != y.len() || nobs <= k || k == 0 {
        return None;
    }

    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];
    for (row, &yi) in rows.iter().zip(y) {
        for i in 0..k {
            xty[i] += row[i] * yi;
            for j in i..k {
                xtx[i][j] += row[i] * row[j];
            }
        }
    }
    for i in 0..k {
        for j in 0..i {
            xtx[i][j] = xtx[j][i];
        }
    }

    let inv = invert(xtx)?;
    let coef: Vec<f64> = (0..k)
        .map(|i| (0..k).map(|j| inv[i][j] * xty[j]).sum())
        .collect();

    let ssr: f64 = rows
        .iter()
        .zip(y)
        .map(|(row, &yi)| {
            let fitted: f64 = row.iter().zip(&coef).map(|(x, b)| x * b).sum();
            (yi - fitted).powi(2)
        })
        .sum();

    let sigma2 = ssr / (nobs - k) as f64;
    let std_err = (0..k).map(|i| (sigma2 * inv[i][i]).max(0.0).sqrt()).collect();

    Some(LstsqFit {
        coef,
        std_err,
        ssr,
        nobs,
    })
}
