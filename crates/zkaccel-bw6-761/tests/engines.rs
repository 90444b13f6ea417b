//! End-to-end checks of the engines on BW6-761

use ark_ec::{AffineRepr, CurveGroup, Group, VariableBaseMSM};
use ark_ff::{One, Zero};
use proptest::prelude::*;
use zkaccel_bw6_761::traits::random_elements;
use zkaccel_bw6_761::*;

const LOG_DOMAIN: u64 = 12;

fn ntt_config() -> NTTConfig<ScalarField> {
    let cfg = NTTConfig::<ScalarField>::default();
    let root: ScalarField = get_root_of_unity(1 << LOG_DOMAIN).unwrap();
    initialize_domain(root, &cfg.ctx, false).unwrap();
    cfg
}

#[test]
fn msm_with_zero_scalars_is_identity() {
    let n = 40;
    let batch = 3;
    let bases: Vec<G1Affine> = CurveCfg::generate_random(n);
    let scalars = vec![ScalarField::zero(); n * batch];
    let mut results = vec![G1Projective::generator(); batch];
    let cfg = MSMConfig {
        batch_size: batch,
        ..Default::default()
    };
    msm(
        HostSlice::from_slice(&scalars),
        HostSlice::from_slice(&bases),
        n,
        &cfg,
        HostSlice::from_mut_slice(&mut results),
    )
    .unwrap();
    assert!(results.iter().all(|r| r.is_zero()));
}

#[test]
fn msm_g1_matches_reference() {
    let n = 300;
    let bases: Vec<G1Affine> = CurveCfg::generate_random(n);
    let scalars = ScalarCfg::generate_random(n);
    let mut result = [G1Projective::zero()];
    msm(
        HostSlice::from_slice(&scalars),
        HostSlice::from_slice(&bases),
        n,
        &MSMConfig::default(),
        HostSlice::from_mut_slice(&mut result),
    )
    .unwrap();
    let expected = G1Projective::msm(&bases, &scalars).unwrap();
    assert!(eq(&result[0], &expected));
}

#[test]
fn msm_g2_matches_reference() {
    let n = 64;
    let bases: Vec<G2Affine> = G2CurveCfg::generate_random(n);
    let scalars = ScalarCfg::generate_random(n);
    let mut result = [G2Projective::zero()];
    msm(
        HostSlice::from_slice(&scalars),
        HostSlice::from_slice(&bases),
        n,
        &MSMConfig::default(),
        HostSlice::from_mut_slice(&mut result),
    )
    .unwrap();
    let expected = G2Projective::msm(&bases, &scalars).unwrap();
    assert_eq!(to_affine(&result[0]), expected.into_affine());
}

#[test]
fn msm_from_device_buffers() {
    let n = 128;
    let ctx = DeviceContext::default();
    let bases: Vec<G1Affine> = CurveCfg::generate_random(n);
    let scalars = ScalarCfg::generate_random(n);
    let d_bases = DeviceVec::from_host(&ctx, HostSlice::from_slice(&bases)).unwrap();
    let d_scalars = DeviceVec::from_host(&ctx, HostSlice::from_slice(&scalars)).unwrap();
    let mut d_result = DeviceVec::<G1Projective>::device_malloc(&ctx, 1).unwrap();

    msm(&d_scalars, &d_bases, n, &MSMConfig::default(), &mut d_result).unwrap();

    let mut result = [G1Projective::zero()];
    d_result.copy_to_host(HostSlice::from_mut_slice(&mut result)).unwrap();
    assert_eq!(result[0], G1Projective::msm(&bases, &scalars).unwrap());
}

#[test]
fn precompute_table_matches_plain_msm() {
    let n = 100;
    let ctx = DeviceContext::default();
    let bases: Vec<G1Affine> = CurveCfg::generate_random(n);
    let scalars = ScalarCfg::generate_random(n);
    let mut plain = [G1Projective::zero()];
    msm(
        HostSlice::from_slice(&scalars),
        HostSlice::from_slice(&bases),
        n,
        &MSMConfig::default(),
        HostSlice::from_mut_slice(&mut plain),
    )
    .unwrap();

    for factor in 1..=4 {
        let table = BasesPrecomputeTable::new(HostSlice::from_slice(&bases), factor, 0, &ctx).unwrap();
        assert_eq!(table.points().len(), n * factor);
        let mut result = [G1Projective::zero()];
        msm_with_table::<G1Projective, _, _>(
            HostSlice::from_slice(&scalars),
            &table,
            n,
            &MSMConfig::default(),
            HostSlice::from_mut_slice(&mut result),
        )
        .unwrap();
        assert_eq!(result[0], plain[0], "precompute factor {}", factor);
    }
}

#[test]
fn precomputed_g2_batches_match_reference() {
    let n = 10;
    let batch = 3;
    let c = 5;
    let ctx = DeviceContext::default();
    let bases: Vec<G2Affine> = G2CurveCfg::generate_random(n * batch);
    let scalars = ScalarCfg::generate_random(n * batch);
    let expected: Vec<G2Projective> = (0..batch)
        .map(|b| {
            let range = b * n..(b + 1) * n;
            G2Projective::msm(&bases[range.clone()], &scalars[range]).unwrap()
        })
        .collect();
    let expected_shared: Vec<G2Projective> = (0..batch)
        .map(|b| G2Projective::msm(&bases[..n], &scalars[b * n..(b + 1) * n]).unwrap())
        .collect();

    for factor in 1..=3 {
        // per-batch bases, expanded base by base
        let mut expanded = vec![G2Affine::identity(); n * batch * factor];
        precompute_msm_bases(
            HostSlice::from_slice(&bases),
            factor,
            c,
            &ctx,
            HostSlice::from_mut_slice(&mut expanded),
        )
        .unwrap();
        let cfg = MSMConfig {
            batch_size: batch,
            precompute_factor: factor,
            c,
            ..Default::default()
        };
        let mut results = vec![G2Projective::zero(); batch];
        msm(
            HostSlice::from_slice(&scalars),
            HostSlice::from_slice(&expanded),
            n,
            &cfg,
            HostSlice::from_mut_slice(&mut results),
        )
        .unwrap();
        assert_eq!(results, expected, "per-batch bases, factor {}", factor);

        // shared bases through a table
        let table =
            BasesPrecomputeTable::new(HostSlice::from_slice(&bases[..n]), factor, c, &ctx).unwrap();
        let cfg = MSMConfig {
            batch_size: batch,
            ..Default::default()
        };
        let mut results = vec![G2Projective::zero(); batch];
        msm_with_table::<G2Projective, _, _>(
            HostSlice::from_slice(&scalars),
            &table,
            n,
            &cfg,
            HostSlice::from_mut_slice(&mut results),
        )
        .unwrap();
        assert_eq!(results, expected_shared, "shared table, factor {}", factor);
    }
}

#[test]
fn montgomery_roundtrip_points() {
    let ctx = DeviceContext::default();
    let original: Vec<G2Affine> = G2CurveCfg::generate_random(8);
    let mut points = original.clone();
    convert_montgomery(HostSlice::from_mut_slice(&mut points), true, &ctx).unwrap();
    assert_ne!(points, original);
    convert_montgomery(HostSlice::from_mut_slice(&mut points), false, &ctx).unwrap();
    assert_eq!(points, original);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn montgomery_roundtrip_scalars(seed in any::<u64>(), len in 0usize..64) {
        let ctx = DeviceContext::default();
        let original: Vec<ScalarField> = random_elements(len, seed);
        let mut data = original.clone();
        convert_montgomery(HostSlice::from_mut_slice(&mut data), true, &ctx).unwrap();
        convert_montgomery(HostSlice::from_mut_slice(&mut data), false, &ctx).unwrap();
        prop_assert_eq!(data, original);
    }

    #[test]
    fn ntt_roundtrip(seed in any::<u64>(), log_size in 0u32..=LOG_DOMAIN as u32) {
        let cfg = ntt_config();
        let size = 1usize << log_size;
        let original: Vec<ScalarField> = random_elements(size, seed);
        let mut freq = vec![ScalarField::zero(); size];
        let mut back = vec![ScalarField::zero(); size];
        ntt(HostSlice::from_slice(&original), size, NTTDir::Forward, &cfg, HostSlice::from_mut_slice(&mut freq)).unwrap();
        ntt(HostSlice::from_slice(&freq), size, NTTDir::Inverse, &cfg, HostSlice::from_mut_slice(&mut back)).unwrap();
        prop_assert_eq!(back, original);
    }
}

#[test]
fn ntt_roundtrip_small_vector() {
    let cfg = ntt_config();
    let input: Vec<ScalarField> = (1..=4u64).map(ScalarField::from).collect();
    let mut freq = vec![ScalarField::zero(); 4];
    let mut back = vec![ScalarField::zero(); 4];
    ntt(HostSlice::from_slice(&input), 4, NTTDir::Forward, &cfg, HostSlice::from_mut_slice(&mut freq)).unwrap();
    // the zero-frequency coefficient is the sum
    assert_eq!(freq[0], ScalarField::from(10u64));
    ntt(HostSlice::from_slice(&freq), 4, NTTDir::Inverse, &cfg, HostSlice::from_mut_slice(&mut back)).unwrap();
    assert_eq!(back, input);
}

#[test]
fn ecntt_roundtrip() {
    let cfg = ntt_config();
    let points: Vec<G1Projective> = CurveCfg::generate_random(32);
    let mut data = points.clone();
    ecntt_inplace(HostSlice::from_mut_slice(&mut data), 32, NTTDir::Forward, &cfg).unwrap();
    ecntt_inplace(HostSlice::from_mut_slice(&mut data), 32, NTTDir::Inverse, &cfg).unwrap();
    assert_eq!(data, points);
}

#[test]
fn merkle_height_one() {
    let ctx = DeviceContext::default();
    let constants = init_optimized_poseidon_constants::<ScalarField>(2, &ctx).unwrap();
    let leaves = ScalarCfg::generate_random(2);
    let mut digests = vec![ScalarField::zero(); 3];
    build_poseidon_merkle_tree(
        HostSlice::from_slice(&leaves),
        HostSlice::from_mut_slice(&mut digests),
        1,
        2,
        &constants,
        &TreeBuilderConfig::default(),
    )
    .unwrap();

    let mut hash = [ScalarField::zero()];
    poseidon_hash(
        HostSlice::from_slice(&leaves),
        HostSlice::from_mut_slice(&mut hash),
        1,
        2,
        &constants,
        &PoseidonConfig::default(),
    )
    .unwrap();
    assert_eq!(&digests[..2], &leaves[..]);
    assert_eq!(digests[2], hash[0]);
}

/// Root computed level by level with one `poseidon_hash` call per node
fn reference_root(leaves: &[ScalarField], arity: usize, constants: &PoseidonConstants<ScalarField>) -> ScalarField {
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(arity)
            .map(|block| {
                let mut out = [ScalarField::zero()];
                poseidon_hash(
                    HostSlice::from_slice(block),
                    HostSlice::from_mut_slice(&mut out),
                    1,
                    arity,
                    constants,
                    &PoseidonConfig::default(),
                )
                .unwrap();
                out[0]
            })
            .collect();
    }
    level[0]
}

#[test]
fn merkle_tree_is_deterministic_and_matches_reference() {
    let ctx = DeviceContext::default();
    for (arity, height) in [(2usize, 7u32), (4, 3), (8, 2)] {
        let constants = init_optimized_poseidon_constants::<ScalarField>(arity, &ctx).unwrap();
        let leaves = ScalarCfg::generate_random(arity.pow(height));
        let len = digests_len(height, arity).unwrap();
        let mut first = vec![ScalarField::zero(); len];
        let mut second = vec![ScalarField::one(); len];
        for digests in [&mut first, &mut second] {
            build_poseidon_merkle_tree(
                HostSlice::from_slice(&leaves),
                HostSlice::from_mut_slice(digests),
                height,
                arity,
                &constants,
                &TreeBuilderConfig::default(),
            )
            .unwrap();
        }
        assert_eq!(first, second);
        assert_eq!(merkle_root(&first), Some(reference_root(&leaves, arity, &constants)));
    }
}

#[test]
fn vec_ops_on_scalars() {
    let a = ScalarCfg::generate_random(64);
    let b = ScalarCfg::generate_random(64);
    let cfg = VecOpsConfig::default();
    let mut sum = vec![ScalarField::zero(); 64];
    let mut diff = vec![ScalarField::zero(); 64];
    let mut prod = vec![ScalarField::zero(); 64];
    add(HostSlice::from_slice(&a), HostSlice::from_slice(&b), &cfg, HostSlice::from_mut_slice(&mut sum)).unwrap();
    sub(HostSlice::from_slice(&sum), HostSlice::from_slice(&b), &cfg, HostSlice::from_mut_slice(&mut diff)).unwrap();
    mul(HostSlice::from_slice(&a), HostSlice::from_slice(&b), &cfg, HostSlice::from_mut_slice(&mut prod)).unwrap();
    assert_eq!(diff, a);
    for i in 0..64 {
        assert_eq!(prod[i], a[i] * b[i]);
    }
}
