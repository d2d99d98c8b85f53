use crate::error::CollocationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollocationScheme {
    #[default]
    Radau,
    Legendre,
}

impl FromStr for CollocationScheme {
    type Err = CollocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "radau" => Ok(Self::Radau),
            "legendre" => Ok(Self::Legendre),
            other => Err(CollocationError::UnknownScheme(other.to_string())),
        }
    }
}

impl fmt::Display for CollocationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Radau => "radau",
            Self::Legendre => "legendre",
        })
    }
}

pub const MAX_DEGREE: usize = 5;

// Gauss-Legendre roots on [0, 1].
const LEGENDRE_POINTS: [&[f64]; MAX_DEGREE] = [
    &[0.5],
    &[0.21132486540518713, 0.7886751345948129],
    &[0.1127016653792583, 0.5, 0.8872983346207417],
    &[
        0.06943184420297371,
        0.33000947820757187,
        0.6699905217924281,
        0.9305681557970262,
    ],
    &[
        0.04691007703066802,
        0.23076534494715845,
        0.5,
        0.7692346550528415,
        0.9530899229693319,
    ],
];

// Radau IIA points on [0, 1]; the last point is the element end.
const RADAU_POINTS: [&[f64]; MAX_DEGREE] = [
    &[1.0],
    &[0.3333333333333333, 1.0],
    &[0.15505102572168217, 0.6449489742783178, 1.0],
    &[
        0.08858795951270394,
        0.4094668644407347,
        0.787659461760847,
        1.0,
    ],
    &[
        0.05710419611451768,
        0.2768430136381238,
        0.5835904323689168,
        0.8602401356562195,
        1.0,
    ],
];

/// Collocation points `[0, tau_1, ..., tau_deg]` of one finite element.
pub fn collocation_points(
    scheme: CollocationScheme,
    degree: usize,
) -> Result<Vec<f64>, CollocationError> {
    if degree == 0 || degree > MAX_DEGREE {
        return Err(CollocationError::DegreeOutOfRange(degree));
    }
    let table = match scheme {
        CollocationScheme::Radau => RADAU_POINTS[degree - 1],
        CollocationScheme::Legendre => LEGENDRE_POINTS[degree - 1],
    };
    let mut points = Vec::with_capacity(degree + 1);
    points.push(0.0);
    points.extend_from_slice(table);
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn legendre_eval(n: usize, x: f64) -> (f64, f64) {
        let mut p0 = 1.0;
        let mut p1 = x;
        for k in 2..=n {
            let kf = k as f64;
            let pn = ((2.0 * kf - 1.0) * x * p1 - (kf - 1.0) * p0) / kf;
            p0 = p1;
            p1 = pn;
        }
        if n == 1 {
            return (x, 1.0);
        }
        let dp = (n as f64) * (x * p1 - p0) / (x * x - 1.0);
        (p1, dp)
    }

    fn gauss_legendre_nodes(n: usize) -> Vec<f64> {
        let mut nodes: Vec<f64> = (0..n)
            .map(|i| {
                let mut x = f64::cos(PI * (i as f64 + 0.75) / (n as f64 + 0.5));
                for _ in 0..50 {
                    let (p, dp) = legendre_eval(n, x);
                    x -= p / dp;
                }
                0.5 * (x + 1.0)
            })
            .collect();
        nodes.sort_by(|a, b| a.total_cmp(b));
        nodes
    }

    #[test]
    fn legendre_table_matches_polynomial_roots() {
        for degree in 1..=MAX_DEGREE {
            let points = collocation_points(CollocationScheme::Legendre, degree).expect("table");
            for (a, b) in points[1..].iter().zip(gauss_legendre_nodes(degree)) {
                assert!((a - b).abs() < 1e-12, "degree {degree}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn radau_points_end_at_the_element_boundary() {
        for degree in 1..=MAX_DEGREE {
            let points = collocation_points(CollocationScheme::Radau, degree).expect("table");
            assert_eq!(points.len(), degree + 1);
            assert_eq!(points[0], 0.0);
            assert_eq!(points[degree], 1.0);
            assert!(points.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn rejects_degrees_outside_the_table() {
        assert_eq!(
            collocation_points(CollocationScheme::Radau, 6),
            Err(CollocationError::DegreeOutOfRange(6))
        );
        assert_eq!(
            collocation_points(CollocationScheme::Legendre, 0),
            Err(CollocationError::DegreeOutOfRange(0))
        );
    }

    #[test]
    fn scheme_names_round_trip() {
        assert_eq!("legendre".parse::<CollocationScheme>(), Ok(CollocationScheme::Legendre));
        assert_eq!(CollocationScheme::Radau.to_string(), "radau");
        assert_eq!(
            "gauss".parse::<CollocationScheme>(),
            Err(CollocationError::UnknownScheme("gauss".to_string()))
        );
    }
}
