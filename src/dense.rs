use derive_builder::Builder;
use num_traits::Zero;
use std::ops::{Add, Mul};

/// Dense matrix stored in row-major order.
#[derive(Debug, Clone, Default, Builder)]
#[builder(default, build_fn(name = "pre_build", validate = "Self::validate"))]
pub struct Mat<T: Default> {
    #[builder(setter(custom))]
    rows: usize,
    #[builder(setter(custom))]
    cols: usize,

    values: Vec<T>,
}

impl<T> MatBuilder<T>
where
    T: Default + Clone,
{
    pub fn build(&self) -> Result<Mat<T>, MatBuilderError>
    where
        T: Zero,
    {
        let mut mat = self.pre_build()?;
        if self.values.is_none() {
            mat.values = vec![T::zero(); mat.rows * mat.cols];
        }
        Ok(mat)
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(values) = &self.values {
            let rows = self.rows.unwrap_or_default();
            let cols = self.cols.unwrap_or_default();
            if values.len() != rows * cols {
                return Err(format!(
                    "values length ({}) must be rows * cols ({} * {} = {})",
                    values.len(),
                    rows,
                    cols,
                    rows * cols
                ));
            }
        }
        Ok(())
    }
}

impl<T> Mat<T>
where
    T: Default + Copy,
{
    pub fn new(rows: usize, cols: usize) -> MatBuilder<T>
    where
        T: Clone + Zero,
    {
        MatBuilder {
            rows: Some(rows),
            cols: Some(cols),
            ..Default::default()
        }
    }

    /// Square zero matrix. Infallible shorthand for `new(n, n).build()`.
    pub fn zeros(n: usize) -> Self
    where
        T: Zero,
    {
        Self {
            rows: n,
            cols: n,
            values: vec![T::zero(); n * n],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
    pub fn cols(&self) -> usize {
        self.cols
    }
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn values(&self) -> &Vec<T> {
        &self.values
    }

    #[inline]
    fn ix(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        self.values[self.ix(row, col)]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, v: T) {
        let i = self.ix(row, col);
        self.values[i] = v
    }

    #[inline]
    pub fn add_at(&mut self, row: usize, col: usize, v: T)
    where
        T: Add<Output = T>,
    {
        let i = self.ix(row, col);
        self.values[i] = self.values[i] + v
    }

    pub fn row(&self, row: usize) -> &[T] {
        assert!(row < self.rows);
        let i = self.ix(row, 0);
        &self.values[i..i + self.cols]
    }

    /// Sub-matrix formed by the given rows and columns.
    pub fn select(&self, rows: &[usize], cols: &[usize]) -> Self {
        let mut values = Vec::with_capacity(rows.len() * cols.len());
        for &r in rows {
            for &c in cols {
                values.push(self.get(r, c));
            }
        }
        Self {
            rows: rows.len(),
            cols: cols.len(),
            values,
        }
    }

    pub fn map<U>(&self, f: impl Fn(&T) -> U) -> Mat<U>
    where
        U: Default + Copy,
    {
        Mat {
            rows: self.rows,
            cols: self.cols,
            values: self.values.iter().map(f).collect(),
        }
    }

    pub fn mat_vec(&self, b: &[T]) -> Vec<T>
    where
        T: Mul<Output = T> + Add<Output = T> + Zero,
    {
        assert_eq!(b.len(), self.cols);

        (0..self.rows).map(|i| dot(self.row(i), b)).collect()
    }

    /// Stacks four blocks `[[a, b], [c, d]]` into one matrix.
    pub fn compose(a: &Self, b: &Self, c: &Self, d: &Self) -> Result<Self, String>
    where
        T: Zero,
    {
        if a.rows != b.rows || c.rows != d.rows || a.cols != c.cols || b.cols != d.cols {
            return Err(format!(
                "block shapes do not conform: {:?} {:?} {:?} {:?}",
                a.shape(),
                b.shape(),
                c.shape(),
                d.shape()
            ));
        }
        let rows = a.rows + c.rows;
        let cols = a.cols + b.cols;
        let mut m = Self {
            rows,
            cols,
            values: vec![T::zero(); rows * cols],
        };
        for (blk, r0, c0) in [(a, 0, 0), (b, 0, a.cols), (c, a.rows, 0), (d, a.rows, a.cols)] {
            for i in 0..blk.rows {
                for j in 0..blk.cols {
                    m.set(r0 + i, c0 + j, blk.get(i, j));
                }
            }
        }
        Ok(m)
    }
}

/// Solves `a * x = b` by LU factorization with partial pivoting.
pub fn lu_solve(mut a: Mat<f64>, b: &[f64]) -> Result<Vec<f64>, String> {
    let n = a.rows();
    if a.cols() != n {
        return Err(format!("matrix must be square: {:?}", a.shape()));
    }
    if b.len() != n {
        return Err(format!("dimension mismatch: matrix {}x{}, rhs {}", n, n, b.len()));
    }
    let mut x = b.to_vec();

    let scale = a.values().iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let eps = f64::EPSILON * scale.max(1.0) * n as f64;

    for k in 0..n {
        let (p, pivot) = (k..n)
            .map(|i| (i, a.get(i, k).abs()))
            .fold((k, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });
        if !pivot.is_finite() || pivot <= eps {
            return Err(format!("matrix is singular at column {}", k));
        }
        if p != k {
            for j in 0..n {
                let t = a.get(k, j);
                a.set(k, j, a.get(p, j));
                a.set(p, j, t);
            }
            x.swap(k, p);
        }
        let akk = a.get(k, k);
        for i in k + 1..n {
            let f = a.get(i, k) / akk;
            if f == 0.0 {
                continue;
            }
            a.set(i, k, f);
            for j in k + 1..n {
                a.add_at(i, j, -f * a.get(k, j));
            }
            x[i] -= f * x[k];
        }
    }
    for k in (0..n).rev() {
        let s: f64 = (k + 1..n).map(|j| a.get(k, j) * x[j]).sum();
        x[k] = (x[k] - s) / a.get(k, k);
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err("solution is not finite".to_string());
    }
    Ok(x)
}

/// Computes the dot-product of `a` and `b`.
pub fn dot<T>(a: &[T], b: &[T]) -> T
where
    T: Mul<Output = T> + Add<Output = T> + Zero + Copy,
{
    a.iter()
        .zip(b)
        .map(|(&ai, &bi)| ai * bi)
        .fold(T::zero(), |x, y| x + y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_validates_length() {
        let m = Mat::<f64>::new(2, 2).values(vec![1.0, 2.0, 3.0]).build();
        assert!(m.is_err());

        let m = Mat::<f64>::new(2, 3).build().unwrap();
        assert_eq!(m.shape(), (2, 3));
        assert!(m.values().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_lu_solve() {
        let a = Mat::new(3, 3)
            .values(vec![2.0, 1.0, -1.0, -3.0, -1.0, 2.0, -2.0, 1.0, 2.0])
            .build()
            .unwrap();
        let x = lu_solve(a, &[8.0, -11.0, -3.0]).unwrap();
        for (xi, ei) in x.iter().zip([2.0, 3.0, -1.0]) {
            assert!((xi - ei).abs() < 1e-12, "{:?}", x);
        }
    }

    #[test]
    fn test_lu_solve_singular() {
        let a = Mat::new(2, 2)
            .values(vec![1.0, 2.0, 2.0, 4.0])
            .build()
            .unwrap();
        assert!(lu_solve(a, &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_compose_and_select() {
        let i2 = Mat::new(2, 2).values(vec![1.0, 0.0, 0.0, 1.0]).build().unwrap();
        let z = Mat::<f64>::zeros(2);
        let m = Mat::compose(&i2, &z, &z, &i2).unwrap();
        assert_eq!(m.shape(), (4, 4));
        assert_eq!(m.get(3, 3), 1.0);
        assert_eq!(m.get(0, 3), 0.0);

        let s = m.select(&[0, 3], &[0, 3]);
        assert_eq!(s.values(), &vec![1.0, 0.0, 0.0, 1.0]);
        assert_eq!(m.mat_vec(&[1.0, 2.0, 3.0, 4.0]), vec![1.0, 2.0, 3.0, 4.0]);
    }
}
