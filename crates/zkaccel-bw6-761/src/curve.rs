//! BW6-761 types and point helpers

use ark_ec::short_weierstrass::{Affine, Projective, SWCurveConfig};
use ark_ec::CurveGroup;
use rand::Rng;
use zkaccel_core::traits::random_elements;
use zkaccel_core::GenerateRandom;

pub type ScalarField = ark_bw6_761::Fr;
pub type G1Affine = ark_bw6_761::G1Affine;
pub type G1Projective = ark_bw6_761::G1Projective;
pub type G2Affine = ark_bw6_761::G2Affine;
pub type G2Projective = ark_bw6_761::G2Projective;

/// Random scalars
pub struct ScalarCfg;

/// Random G1 points
pub struct CurveCfg;

/// Random G2 points
pub struct G2CurveCfg;

/// Projective equality, independent of the representative
pub fn eq<P: SWCurveConfig>(a: &Projective<P>, b: &Projective<P>) -> bool {
    a == b
}

pub fn to_affine<P: SWCurveConfig>(point: &Projective<P>) -> Affine<P> {
    point.into_affine()
}

fn fresh_seed() -> u64 {
    rand::thread_rng().gen()
}

fn random_projective<P: SWCurveConfig>(size: usize) -> Vec<Projective<P>> {
    random_elements(size, fresh_seed())
}

fn random_affine<P: SWCurveConfig>(size: usize) -> Vec<Affine<P>> {
    Projective::normalize_batch(&random_projective::<P>(size))
}

impl GenerateRandom<ScalarField> for ScalarCfg {
    fn generate_random(size: usize) -> Vec<ScalarField> {
        random_elements(size, fresh_seed())
    }
}

impl GenerateRandom<G1Projective> for CurveCfg {
    fn generate_random(size: usize) -> Vec<G1Projective> {
        random_projective(size)
    }
}

impl GenerateRandom<G1Affine> for CurveCfg {
    fn generate_random(size: usize) -> Vec<G1Affine> {
        random_affine(size)
    }
}

impl GenerateRandom<G2Projective> for G2CurveCfg {
    fn generate_random(size: usize) -> Vec<G2Projective> {
        random_projective(size)
    }
}

impl GenerateRandom<G2Affine> for G2CurveCfg {
    fn generate_random(size: usize) -> Vec<G2Affine> {
        random_affine(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ec::{AffineRepr, Group};
    use ark_ff::Field;

    #[test]
    fn test_eq_ignores_representative() {
        let g = G1Projective::generator();
        let mut scaled = g;
        scaled.x.double_in_place();
        scaled.x.double_in_place();
        scaled.y.double_in_place();
        scaled.y.double_in_place();
        scaled.y.double_in_place();
        scaled.z.double_in_place();
        // (4x : 8y : 2z) is the same point in Jacobian coordinates
        assert!(eq(&g, &scaled));
        assert!(!eq(&g, &g.double()));
    }

    #[test]
    fn test_affine_roundtrip() {
        let points: Vec<G2Projective> = G2CurveCfg::generate_random(16);
        for p in &points {
            assert_eq!(to_affine(p).into_group(), *p);
        }
        assert!(to_affine(&G1Projective::default()).is_zero());
    }

    #[test]
    fn test_generate_random_sizes() {
        let s: Vec<ScalarField> = ScalarCfg::generate_random(10);
        let a: Vec<G1Affine> = CurveCfg::generate_random(3);
        assert_eq!(s.len(), 10);
        assert_eq!(a.len(), 3);
        assert!(a.iter().all(|p| p.is_on_curve()));
    }
}
