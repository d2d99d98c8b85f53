use crate::traits::Element;
use num_traits::{One, Zero};
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

/// Simple Dual Number for Forward Mode AD
/// val: real part
/// eps: infinitesimal part (one seed direction)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Dual {
    pub val: f64,
    pub eps: f64,
}

impl Dual {
    pub fn new(val: f64, eps: f64) -> Self {
        Self { val, eps }
    }

    pub fn constant(val: f64) -> Self {
        Self::new(val, 0.0)
    }
}

/// Pairs nonzeros with seeds. Slices must have equal length.
pub fn seed(values: &[f64], seeds: &[f64]) -> Vec<Dual> {
    values
        .iter()
        .zip(seeds)
        .map(|(&v, &s)| Dual::new(v, s))
        .collect()
}

/// Splits a dual buffer back into its value and derivative parts.
pub fn unzip(duals: &[Dual]) -> (Vec<f64>, Vec<f64>) {
    duals.iter().map(|d| (d.val, d.eps)).unzip()
}

impl Zero for Dual {
    fn zero() -> Self {
        Self::new(0.0, 0.0)
    }
    fn is_zero(&self) -> bool {
        self.val == 0.0 && self.eps == 0.0
    }
}

impl One for Dual {
    fn one() -> Self {
        Self::new(1.0, 0.0)
    }
}

impl Add for Dual {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.val + rhs.val, self.eps + rhs.eps)
    }
}

impl Sub for Dual {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.val - rhs.val, self.eps - rhs.eps)
    }
}

impl Mul for Dual {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(self.val * rhs.val, self.val * rhs.eps + self.eps * rhs.val)
    }
}

impl Div for Dual {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        let denom = rhs.val * rhs.val;
        Self::new(
            self.val / rhs.val,
            (self.eps * rhs.val - self.val * rhs.eps) / denom,
        )
    }
}

impl Neg for Dual {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.val, -self.eps)
    }
}

impl AddAssign for Dual {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
impl SubAssign for Dual {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}
impl MulAssign for Dual {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl Element for Dual {
    fn from_f64(value: f64) -> Self {
        Self::constant(value)
    }
    fn sin(&self) -> Self {
        Self::new(self.val.sin(), self.eps * self.val.cos())
    }
    fn cos(&self) -> Self {
        Self::new(self.val.cos(), -self.eps * self.val.sin())
    }
    fn exp(&self) -> Self {
        let e = self.val.exp();
        Self::new(e, e * self.eps)
    }
    fn ln(&self) -> Self {
        Self::new(self.val.ln(), self.eps / self.val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_rule() {
        let x = Dual::new(3.0, 1.0);
        let y = x * x * x;
        assert_eq!(y.val, 27.0);
        assert_eq!(y.eps, 27.0);
    }

    #[test]
    fn quotient_and_transcendentals() {
        let x = Dual::new(2.0, 1.0);
        let q = Dual::one() / x;
        assert!((q.eps + 0.25).abs() < 1e-15);

        let s = Element::sin(&x);
        assert!((s.eps - 2.0f64.cos()).abs() < 1e-15);

        let l = Element::ln(&Element::exp(&x));
        assert!((l.val - 2.0).abs() < 1e-14);
        assert!((l.eps - 1.0).abs() < 1e-14);
    }

    #[test]
    fn seed_and_unzip_round_trip() {
        let d = seed(&[1.0, 2.0], &[0.5, 0.0]);
        let (v, e) = unzip(&d);
        assert_eq!(v, vec![1.0, 2.0]);
        assert_eq!(e, vec![0.5, 0.0]);
    }
}
