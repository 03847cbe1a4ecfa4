//! Error norms between a reference result and a tested result.

use std::fmt;

use crate::errors::{ConvolutionError, ConvolutionResult};

/// Compensated summation, used for the Frobenius check norm.
#[derive(Debug, Clone, Copy, Default)]
struct KahanSum {
    sum: f64,
    compensation: f64,
}

impl KahanSum {
    fn add(&mut self, value: f64) {
        let y = value - self.compensation;
        let t = self.sum + y;
        self.compensation = (t - self.sum) - y;
        self.sum = t;
    }

    fn value(&self) -> f64 {
        self.sum
    }
}

/// Aggregate error statistics of one comparison.
///
/// `l2_rel` and `normf_rel` are computed independently: `l2_rel` divides by the
/// reference norm clamped to `f64::EPSILON`, `normf_rel` is the compensated
/// Frobenius ratio that falls back to the absolute norm when the reference is
/// all zero. They diverge when the reference has near-zero regions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ErrorMetrics {
    pub l1_ref: f64,
    pub l1_tst: f64,
    pub l2_abs: f64,
    pub l2_rel: f64,
    pub linf_abs: f64,
    pub linf_rel: f64,
    pub normf_rel: f64,
}

impl ErrorMetrics {
    /// Compares two equally sized buffers element by element.
    pub fn compare<T: Copy + Into<f64>>(reference: &[T], test: &[T]) -> ConvolutionResult<Self> {
        if reference.len() != test.len() {
            return Err(ConvolutionError::LengthMismatch {
                reference: reference.len(),
                test: test.len(),
            });
        }

        let mut l1_ref = 0.0;
        let mut l1_tst = 0.0;
        let mut sum_sq_diff = 0.0;
        let mut sum_sq_ref = 0.0;
        let mut linf_abs: f64 = 0.0;
        let mut linf_ref: f64 = 0.0;
        let mut frob_diff = KahanSum::default();
        let mut frob_ref = KahanSum::default();

        for (&r, &t) in reference.iter().zip(test) {
            let r: f64 = r.into();
            let t: f64 = t.into();
            let diff = r - t;

            l1_ref += r.abs();
            l1_tst += t.abs();
            sum_sq_diff += diff * diff;
            sum_sq_ref += r * r;
            linf_abs = linf_abs.max(diff.abs());
            linf_ref = linf_ref.max(r.abs());
            frob_diff.add(diff * diff);
            frob_ref.add(r * r);
        }

        let l2_abs = sum_sq_diff.sqrt();
        let l2_rel = l2_abs / sum_sq_ref.sqrt().max(f64::EPSILON);
        let linf_rel = linf_abs / linf_ref.max(f64::EPSILON);

        let normf_rel = if frob_ref.value() > 0.0 {
            (frob_diff.value() / frob_ref.value()).sqrt()
        } else {
            frob_diff.value().sqrt()
        };

        Ok(Self {
            l1_ref,
            l1_tst,
            l2_abs,
            l2_rel,
            linf_abs,
            linf_rel,
            normf_rel,
        })
    }

    /// Field-wise worst case of two snapshots.
    pub fn reduce(&self, other: &Self) -> Self {
        Self {
            l1_ref: self.l1_ref.max(other.l1_ref),
            l1_tst: self.l1_tst.max(other.l1_tst),
            l2_abs: self.l2_abs.max(other.l2_abs),
            l2_rel: self.l2_rel.max(other.l2_rel),
            linf_abs: self.linf_abs.max(other.linf_abs),
            linf_rel: self.linf_rel.max(other.linf_rel),
            normf_rel: self.normf_rel.max(other.normf_rel),
        }
    }

    /// True when no element differs.
    pub fn is_exact(&self) -> bool {
        self.linf_abs == 0.0
    }

    /// The seven norms in report order.
    pub fn as_array(&self) -> [f64; 7] {
        [
            self.l1_ref,
            self.l1_tst,
            self.l2_abs,
            self.l2_rel,
            self.linf_abs,
            self.linf_rel,
            self.normf_rel,
        ]
    }
}

impl fmt::Display for ErrorMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "L1 reference  : {}", self.l1_ref)?;
        writeln!(f, "L1 test       : {}", self.l1_tst)?;
        writeln!(f, "L2 abs.error  : {}", self.l2_abs)?;
        writeln!(f, "L2 rel.error  : {}", self.l2_rel)?;
        writeln!(f, "Linf abs.error: {}", self.linf_abs)?;
        writeln!(f, "Linf rel.error: {}", self.linf_rel)?;
        write!(f, "Check-norm    : {}", self.normf_rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_buffers_have_zero_error() {
        let data = [3i32, -4, 0, 12];
        let metrics = ErrorMetrics::compare(&data, &data).unwrap();
        assert_eq!(metrics.l1_ref, 19.0);
        assert_eq!(metrics.l1_tst, 19.0);
        assert_eq!(metrics.l2_abs, 0.0);
        assert_eq!(metrics.normf_rel, 0.0);
        assert!(metrics.is_exact());
    }

    #[test]
    fn test_known_difference() {
        let reference = [3i32, 4];
        let test = [3i32, 1];
        let metrics = ErrorMetrics::compare(&reference, &test).unwrap();
        assert_eq!(metrics.l2_abs, 3.0);
        assert_eq!(metrics.l2_rel, 3.0 / 5.0);
        assert_eq!(metrics.linf_abs, 3.0);
        assert_eq!(metrics.linf_rel, 3.0 / 4.0);
        assert!((metrics.normf_rel - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_zero_reference_falls_back_to_absolute_norm() {
        let reference = [0i32, 0];
        let test = [3i32, 4];
        let metrics = ErrorMetrics::compare(&reference, &test).unwrap();
        assert_eq!(metrics.normf_rel, 5.0);
        assert_eq!(metrics.l2_rel, 5.0 / f64::EPSILON);
    }

    #[test]
    fn test_length_mismatch() {
        let result = ErrorMetrics::compare(&[1i32, 2], &[1i32]);
        assert_eq!(
            result,
            Err(ConvolutionError::LengthMismatch {
                reference: 2,
                test: 1
            })
        );
    }

    #[test]
    fn test_display_labels() {
        let text = ErrorMetrics::default().to_string();
        assert!(text.starts_with("L1 reference  : 0"));
        assert!(text.ends_with("Check-norm    : 0"));
        assert_eq!(text.lines().count(), 7);
    }
}
