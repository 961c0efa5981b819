// Numeric primitives used by the metrics, change and insight stages.
//
// Every function returns a neutral value for degenerate input (too few
// samples, zero variance) instead of failing, so callers can run them over
// arbitrary user-filtered slices.

use crate::models::{AnomalyScore, ConfidenceInterval, ForecastResult, Severity, TTestResult, Trend};

/// Scale factor that makes MAD comparable to a standard deviation.
const MAD_SCALE: f64 = 0.6745;

/// Two-tailed critical t values: (df, [alpha 0.01, alpha 0.05, alpha 0.10]).
const T_CRITICAL: [(usize, [f64; 3]); 4] = [
    (5, [4.032, 2.571, 2.015]),
    (10, [3.169, 2.228, 1.812]),
    (20, [2.845, 2.086, 1.725]),
    (30, [2.750, 2.042, 1.697]),
];

const P_BUCKETS: [f64; 3] = [0.01, 0.05, 0.10];
const P_BUCKET_FLOOR: f64 = 0.20;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values);
    values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Sample standard deviation (divides by n - 1).
pub fn std_dev(values: &[f64]) -> f64 {
    sample_variance(values).sqrt()
}

/// Population standard deviation (divides by n).
pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let avg = mean(values);
    (values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

pub fn standard_error(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    std_dev(values) / (values.len() as f64).sqrt()
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// z multiplier for the supported confidence levels; unknown levels use 95%.
pub fn z_for_level(level: f64) -> f64 {
    if (level - 0.90).abs() < 1e-9 {
        1.645
    } else if (level - 0.99).abs() < 1e-9 {
        2.576
    } else {
        1.96
    }
}

pub fn confidence_interval(values: &[f64], level: f64) -> ConfidenceInterval {
    let avg = mean(values);
    let margin = z_for_level(level) * standard_error(values);
    ConfidenceInterval {
        mean: avg,
        lower: avg - margin,
        upper: avg + margin,
        level,
    }
}

// Abramowitz & Stegun 7.1.26, max error 1.5e-7.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = ((((1.061_405_429 * t - 1.453_152_027) * t + 1.421_413_741) * t - 0.284_496_736)
        * t
        + 0.254_829_592)
        * t;
    sign * (1.0 - poly * (-x * x).exp())
}

/// Standard normal cumulative distribution function.
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

fn bucketed_p_value(t_abs: f64, df: usize) -> f64 {
    let mut nearest = T_CRITICAL[0];
    for row in T_CRITICAL.iter().skip(1) {
        if row.0.abs_diff(df) < nearest.0.abs_diff(df) {
            nearest = *row;
        }
    }

    for (critical, bucket) in nearest.1.iter().zip(P_BUCKETS) {
        if t_abs > *critical {
            return bucket;
        }
    }
    P_BUCKET_FLOOR
}

fn neutral_t_test(degrees_of_freedom: usize) -> TTestResult {
    TTestResult {
        t_statistic: 0.0,
        p_value: 1.0,
        degrees_of_freedom,
        effect_size: 0.0,
        is_significant: false,
    }
}

/// Pooled-variance two-sample t-test.
///
/// Groups with fewer than two samples, or two groups whose pooled standard
/// deviation is zero, produce a neutral result (t = 0, p = 1).
pub fn t_test(group1: &[f64], group2: &[f64], confidence_level: f64) -> TTestResult {
    let (n1, n2) = (group1.len(), group2.len());
    if n1 < 2 || n2 < 2 {
        return neutral_t_test((n1 + n2).saturating_sub(2));
    }

    let df = n1 + n2 - 2;
    let (mean1, mean2) = (mean(group1), mean(group2));
    let pooled_variance = ((n1 - 1) as f64 * sample_variance(group1)
        + (n2 - 1) as f64 * sample_variance(group2))
        / df as f64;
    let pooled_sd = pooled_variance.sqrt();

    if pooled_sd == 0.0 {
        return neutral_t_test(df);
    }

    let standard_error = pooled_sd * (1.0 / n1 as f64 + 1.0 / n2 as f64).sqrt();
    let t_statistic = (mean1 - mean2) / standard_error;

    let p_value = if df > 30 {
        2.0 * (1.0 - normal_cdf(t_statistic.abs()))
    } else {
        bucketed_p_value(t_statistic.abs(), df)
    };

    TTestResult {
        t_statistic,
        p_value,
        degrees_of_freedom: df,
        effect_size: (mean1 - mean2) / pooled_sd,
        is_significant: p_value < 1.0 - confidence_level,
    }
}

fn severity_for(z_abs: f64) -> Severity {
    if z_abs > 5.0 {
        Severity::Critical
    } else if z_abs > 4.0 {
        Severity::Moderate
    } else {
        Severity::Minor
    }
}

/// Median/MAD outlier check.
///
/// A zero MAD (most of the history identical) yields a modified z of zero, so
/// such histories never flag an anomaly.
pub fn detect_anomaly(value: f64, historical: &[f64], threshold: f64) -> AnomalyScore {
    if historical.len() < 3 {
        return AnomalyScore {
            is_anomaly: false,
            modified_z: 0.0,
            median: median(historical),
            mad: 0.0,
            severity: Severity::Minor,
        };
    }

    let center = median(historical);
    let deviations: Vec<f64> = historical.iter().map(|v| (v - center).abs()).collect();
    let mad = median(&deviations);
    let modified_z = if mad == 0.0 {
        0.0
    } else {
        MAD_SCALE * (value - center) / mad
    };

    AnomalyScore {
        is_anomaly: modified_z.abs() > threshold,
        modified_z,
        median: center,
        mad,
        severity: severity_for(modified_z.abs()),
    }
}

/// Ordinary least squares over the sample index, projected `periods_ahead` past the last point.
pub fn forecast_linear(values: &[f64], periods_ahead: usize) -> ForecastResult {
    if values.len() < 3 {
        return ForecastResult {
            predicted: values.last().copied().unwrap_or(0.0),
            confidence: 0.0,
            trend: Trend::Stable,
            slope: 0.0,
            intercept: 0.0,
        };
    }

    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean(values);

    let mut covariance = 0.0;
    let mut x_spread = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        covariance += dx * (y - y_mean);
        x_spread += dx * dx;
    }
    let slope = covariance / x_spread;
    let intercept = y_mean - slope * x_mean;

    let ss_total: f64 = values.iter().map(|y| (y - y_mean).powi(2)).sum();
    let ss_residual: f64 = values
        .iter()
        .enumerate()
        .map(|(i, y)| (y - (slope * i as f64 + intercept)).powi(2))
        .sum();
    let r_squared = if ss_total == 0.0 {
        1.0
    } else {
        1.0 - ss_residual / ss_total
    };

    let trend = if slope.abs() > 0.05 * y_mean.abs() {
        if slope > 0.0 {
            Trend::Increasing
        } else {
            Trend::Decreasing
        }
    } else {
        Trend::Stable
    };

    let target = (values.len() + periods_ahead) as f64 - 1.0;
    ForecastResult {
        predicted: (slope * target + intercept).max(0.0),
        confidence: r_squared.max(0.0),
        trend,
        slope,
        intercept,
    }
}

/// Pearson correlation coefficient.
pub fn correlation(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 {
        return 0.0;
    }

    let (x_mean, y_mean) = (mean(x), mean(y));
    let mut numerator = 0.0;
    let mut x_sq = 0.0;
    let mut y_sq = 0.0;
    for (a, b) in x.iter().zip(y) {
        let (dx, dy) = (a - x_mean, b - y_mean);
        numerator += dx * dy;
        x_sq += dx * dx;
        y_sq += dy * dy;
    }

    if x_sq == 0.0 || y_sq == 0.0 {
        return 0.0;
    }
    numerator / (x_sq * y_sq).sqrt()
}
