//! Standard and projection Procrustes superimposition.

use crate::config::ScaleMode;
use crate::error::TraceError;
use crate::linalg::LinalgBackend;
use ndarray::{concatenate, s, Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Similarity transform mapping a source configuration `X` onto a target `Y`.
#[derive(Debug, Clone)]
pub struct ProcrustesFit {
    /// Rotation/reflection `A`, d x d.
    pub rotation: Array2<f64>,
    /// Translation `b`, length d.
    pub translation: Array1<f64>,
    /// Scale `rho`.
    pub scale: f64,
    /// Goodness of fit `t` in [0, 1]; 1 is a perfect superimposition.
    pub similarity: f64,
    /// `rho * X * A + b`.
    pub transformed: Array2<f64>,
}

impl ProcrustesFit {
    /// Applies the transform to a single point: `rho * p * A + b`.
    pub fn apply(&self, point: ArrayView1<f64>) -> Array1<f64> {
        point.dot(&self.rotation) * self.scale + &self.translation
    }
}

fn column_means(m: ArrayView2<f64>, which: &'static str) -> Result<Array1<f64>, TraceError> {
    m.mean_axis(Axis(0))
        .ok_or(TraceError::DegenerateConfiguration(which))
}

fn sum_of_squares(m: &Array2<f64>) -> f64 {
    m.iter().map(|v| v * v).sum()
}

/// Procrustes analysis of two configurations with equal dimensionality.
pub fn procrustes<B: LinalgBackend + ?Sized>(
    x: ArrayView2<f64>,
    y: ArrayView2<f64>,
    scale_mode: ScaleMode,
    backend: &B,
) -> Result<ProcrustesFit, TraceError> {
    if x.dim() != y.dim() {
        return Err(TraceError::ShapeMismatch {
            context: "Procrustes analysis",
            expected: format!("{}x{} target", x.nrows(), x.ncols()),
            found: format!("{}x{}", y.nrows(), y.ncols()),
        });
    }
    let xm = column_means(x, "empty source")?;
    let ym = column_means(y, "empty target")?;
    let xc = &x - &xm;
    let yc = &y - &ym;

    let trace_xx = sum_of_squares(&xc);
    let trace_yy = sum_of_squares(&yc);
    if trace_xx == 0.0 {
        return Err(TraceError::DegenerateConfiguration("source"));
    }
    if trace_yy == 0.0 {
        return Err(TraceError::DegenerateConfiguration("target"));
    }

    let cross = yc.t().dot(&xc);
    let svd = backend.singular_value_decompose(&cross)?;
    let rotation = svd.v.dot(&svd.u.t());

    let scale = match scale_mode {
        ScaleMode::MaximizeSimilarity => svd.singular_values.sum() / trace_xx,
        ScaleMode::MatchVariance => (trace_yy / trace_xx).sqrt(),
    };
    let translation = &ym - &(xm.dot(&rotation) * scale);
    let transformed = x.dot(&rotation) * scale + &translation;

    let residual = &y - &transformed;
    let similarity = (1.0 - sum_of_squares(&residual) / trace_yy).max(0.0).sqrt();

    Ok(ProcrustesFit {
        rotation,
        translation,
        scale,
        similarity,
        transformed,
    })
}

/// Iteration limits for projection Procrustes.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionOptions {
    pub max_iterations: usize,
    pub threshold: f64,
    pub scale_mode: ScaleMode,
}

/// Result of projection Procrustes; always carries the last iterate.
#[derive(Debug, Clone)]
pub struct ProjectionFit {
    /// Full-dimensional transform from the last iteration, used to place new points.
    pub alignment: ProcrustesFit,
    /// Goodness of fit over the target's dimensions only.
    pub similarity: f64,
    /// Final estimate of the padding columns `Z`.
    pub padding: Array2<f64>,
    pub epsilon: f64,
    pub epsilon_history: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
}

impl ProjectionFit {
    pub fn apply(&self, point: ArrayView1<f64>) -> Array1<f64> {
        self.alignment.apply(point)
    }
}

/// Relative change of the padding estimate between two iterates.
fn padding_change(z_new: &Array2<f64>, z_old: &Array2<f64>) -> f64 {
    let change = sum_of_squares(&(z_new - z_old));
    let spread = match z_new.mean_axis(Axis(0)) {
        Some(mean) => sum_of_squares(&(z_new - &mean)),
        None => 0.0,
    };
    if spread > 0.0 {
        change / spread
    } else if change == 0.0 {
        0.0
    } else {
        f64::INFINITY
    }
}

/// Aligns a higher-dimensional `X` (n x DimX) to `Y` (n x DimY).
///
/// `Y` is padded with DimX-DimY columns `Z`, re-estimated from the trailing
/// columns of the aligned `X` until the relative change `epsilon` drops to
/// the threshold or the iteration cap is hit. Hitting the cap is not an
/// error: the last iterate is returned with `converged == false`.
pub fn projection_procrustes<B: LinalgBackend + ?Sized>(
    x: ArrayView2<f64>,
    y: ArrayView2<f64>,
    options: &ProjectionOptions,
    backend: &B,
) -> Result<ProjectionFit, TraceError> {
    let (n, dim_x) = x.dim();
    let dim_y = y.ncols();
    if y.nrows() != n {
        return Err(TraceError::ShapeMismatch {
            context: "projection Procrustes",
            expected: format!("{} rows in target", n),
            found: format!("{} rows", y.nrows()),
        });
    }
    if dim_x < dim_y {
        return Err(TraceError::TargetDimensionTooHigh {
            source_dims: dim_x,
            target_dims: dim_y,
        });
    }
    if dim_x == dim_y {
        let fit = procrustes(x, y, options.scale_mode, backend)?;
        return Ok(ProjectionFit {
            similarity: fit.similarity,
            alignment: fit,
            padding: Array2::zeros((n, 0)),
            epsilon: 0.0,
            epsilon_history: Vec::new(),
            iterations: 0,
            converged: true,
        });
    }

    let mut padding = Array2::<f64>::zeros((n, dim_x - dim_y));
    let mut epsilon_history = Vec::new();
    let mut last_fit: Option<ProcrustesFit> = None;
    let mut epsilon = f64::INFINITY;
    let mut iterations = 0;

    while iterations < options.max_iterations {
        iterations += 1;
        let target = concatenate(Axis(1), &[y.view(), padding.view()])
            .map_err(|e| TraceError::ShapeMismatch {
                context: "projection Procrustes padding",
                expected: format!("{} rows", n),
                found: e.to_string(),
            })?;
        let fit = procrustes(x, target.view(), options.scale_mode, backend)?;
        let z_new = fit.transformed.slice(s![.., dim_y..]).to_owned();
        epsilon = padding_change(&z_new, &padding);
        epsilon_history.push(epsilon);
        last_fit = Some(fit);
        padding = z_new;
        if epsilon <= options.threshold {
            break;
        }
    }

    let alignment = last_fit.ok_or_else(|| {
        TraceError::InvalidConfig("projection Procrustes needs at least one iteration".to_string())
    })?;
    let leading = alignment.transformed.slice(s![.., ..dim_y]);
    let similarity = procrustes(leading, y, options.scale_mode, backend)?.similarity;

    Ok(ProjectionFit {
        alignment,
        similarity,
        padding,
        converged: epsilon <= options.threshold,
        epsilon,
        epsilon_history,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::LapackBackend;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_configuration(n: usize, scales: &[f64], seed: u64) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Array2::from_shape_fn((n, scales.len()), |(_, j)| {
            rng.random_range(-1.0..1.0) * scales[j]
        })
    }

    fn rotation_2d(angle: f64) -> Array2<f64> {
        array![[angle.cos(), -angle.sin()], [angle.sin(), angle.cos()]]
    }

    #[test]
    fn recovers_rigid_similarity_transform() {
        let x = random_configuration(30, &[3.0, 1.0], 11);
        let r = rotation_2d(0.7);
        let b = array![4.0, -2.5];
        let y = x.dot(&r) * 1.8 + &b;
        for mode in [ScaleMode::MaximizeSimilarity, ScaleMode::MatchVariance] {
            let fit = procrustes(x.view(), y.view(), mode, &LapackBackend).unwrap();
            assert_abs_diff_eq!(fit.similarity, 1.0, epsilon = 1e-6);
            assert_abs_diff_eq!(fit.scale, 1.8, epsilon = 1e-9);
            for (a, e) in fit.rotation.iter().zip(r.iter()) {
                assert_abs_diff_eq!(*a, *e, epsilon = 1e-9);
            }
            for (a, e) in fit.translation.iter().zip(b.iter()) {
                assert_abs_diff_eq!(*a, *e, epsilon = 1e-9);
            }
            let mapped = fit.apply(x.row(4));
            assert_abs_diff_eq!(mapped[0], y[[4, 0]], epsilon = 1e-9);
            assert_abs_diff_eq!(mapped[1], y[[4, 1]], epsilon = 1e-9);
        }
    }

    #[test]
    fn handles_reflection() {
        let x = random_configuration(20, &[2.0, 1.0], 12);
        let flip = array![[1.0, 0.0], [0.0, -1.0]];
        let y = x.dot(&flip);
        let fit = procrustes(x.view(), y.view(), ScaleMode::MaximizeSimilarity, &LapackBackend).unwrap();
        assert_abs_diff_eq!(fit.similarity, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(fit.rotation[[1, 1]], -1.0, epsilon = 1e-9);
    }

    #[test]
    fn unrelated_configurations_fit_poorly() {
        let x = random_configuration(40, &[1.0, 1.0], 13);
        let y = random_configuration(40, &[1.0, 1.0], 14);
        let fit = procrustes(x.view(), y.view(), ScaleMode::MaximizeSimilarity, &LapackBackend).unwrap();
        assert!(fit.similarity < 0.9);
        assert!(fit.similarity >= 0.0);
    }

    #[test]
    fn degenerate_source_is_an_alignment_failure() {
        let x = Array2::<f64>::ones((5, 2));
        let y = random_configuration(5, &[1.0, 1.0], 15);
        let err = procrustes(x.view(), y.view(), ScaleMode::MaximizeSimilarity, &LapackBackend).unwrap_err();
        assert!(err.is_alignment_failure());
    }

    #[test]
    fn projection_converges_for_embedded_target() {
        let x = random_configuration(60, &[5.0, 3.0, 1.0, 0.5], 16);
        let r = rotation_2d(-1.1);
        let y = x.slice(s![.., ..2]).dot(&r) * 0.6 + &array![1.0, 2.0];
        let options = ProjectionOptions {
            max_iterations: 10_000,
            threshold: 1e-6,
            scale_mode: ScaleMode::MaximizeSimilarity,
        };
        let fit = projection_procrustes(x.view(), y.view(), &options, &LapackBackend).unwrap();
        assert!(fit.converged);
        assert!(fit.iterations < options.max_iterations);
        assert!(fit.epsilon <= options.threshold);
        assert_abs_diff_eq!(fit.similarity, 1.0, epsilon = 1e-4);
        assert_eq!(fit.alignment.rotation.dim(), (4, 4));
        assert_eq!(fit.padding.dim(), (60, 2));
        let first = fit.epsilon_history[0];
        assert!(fit.epsilon_history.last().copied().unwrap() <= first);

        let mapped = fit.apply(x.row(7));
        assert_abs_diff_eq!(mapped[0], y[[7, 0]], epsilon = 1e-2);
        assert_abs_diff_eq!(mapped[1], y[[7, 1]], epsilon = 1e-2);
    }

    #[test]
    fn padding_is_carried_between_iterations() {
        let x = random_configuration(30, &[4.0, 2.0, 1.0], 19);
        let target = random_configuration(30, &[3.0, 1.0, 0.5], 20);
        // target columns borrowed from a larger array
        let y = target.slice(s![.., ..2]);
        let options = ProjectionOptions {
            max_iterations: 5,
            threshold: 1e-300,
            scale_mode: ScaleMode::MatchVariance,
        };
        let fit = projection_procrustes(x.view(), y, &options, &LapackBackend).unwrap();
        assert_eq!(fit.iterations, 5);
        assert_eq!(fit.epsilon_history.len(), 5);
        assert_eq!(fit.padding.dim(), (30, 1));
        assert!(fit.padding.iter().any(|v| *v != 0.0));
    }

    #[test]
    fn iteration_cap_returns_non_converged_fit() {
        let x = random_configuration(25, &[2.0, 1.5, 1.0], 17);
        let y = random_configuration(25, &[1.0, 1.0], 18);
        let options = ProjectionOptions {
            max_iterations: 1,
            threshold: 1e-300,
            scale_mode: ScaleMode::MaximizeSimilarity,
        };
        let fit = projection_procrustes(x.view(), y.view(), &options, &LapackBackend).unwrap();
        assert!(!fit.converged);
        assert_eq!(fit.iterations, 1);
        assert_eq!(fit.epsilon_history.len(), 1);
    }

    #[test]
    fn equal_dimensions_degenerate_to_standard_procrustes() {
        let x = random_configuration(15, &[1.0, 2.0], 19);
        let y = x.dot(&rotation_2d(0.3));
        let options = ProjectionOptions {
            max_iterations: 10,
            threshold: 1e-6,
            scale_mode: ScaleMode::MatchVariance,
        };
        let fit = projection_procrustes(x.view(), y.view(), &options, &LapackBackend).unwrap();
        assert!(fit.converged);
        assert_eq!(fit.iterations, 0);
        assert_abs_diff_eq!(fit.similarity, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn higher_target_dimension_fails_fast() {
        let x = random_configuration(10, &[1.0, 1.0], 20);
        let y = random_configuration(10, &[1.0, 1.0, 1.0], 21);
        let options = ProjectionOptions {
            max_iterations: 10,
            threshold: 1e-6,
            scale_mode: ScaleMode::MaximizeSimilarity,
        };
        assert!(matches!(
            projection_procrustes(x.view(), y.view(), &options, &LapackBackend),
            Err(TraceError::TargetDimensionTooHigh {
                source_dims: 2,
                target_dims: 3
            })
        ));
    }
}
