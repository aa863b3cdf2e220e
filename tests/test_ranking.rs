//! CMC / mAP evaluation, standard and CUHK03 protocols.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ferrite_reid::error::ReidError;
use ferrite_reid::math::matrix::Matrix;
use ferrite_reid::metrics::distance::{compute_distance_matrix, DistanceMatrix, DistanceMetric};
use ferrite_reid::metrics::ranking::{evaluate, EvalOptions, EvalProtocol, RankingResult, SplitLabels, JUNK_PID};

fn run(distmat: &DistanceMatrix, q: (&[i64], &[i64]), g: (&[i64], &[i64]), opts: &EvalOptions) -> Result<RankingResult, ReidError> {
    evaluate(distmat, SplitLabels::new(q.0, q.1), SplitLabels::new(g.0, g.1), opts)
}

fn embed(query: Vec<Vec<f64>>, gallery: Vec<Vec<f64>>) -> DistanceMatrix {
    let q = Matrix::from_rows(query, 2).unwrap();
    let g = Matrix::from_rows(gallery, 2).unwrap();
    compute_distance_matrix(&q, &g, DistanceMetric::SquaredEuclidean).unwrap()
}

/// Random distances where every query identity appears in the gallery under
/// another camera.
fn random_problem(seed: u64) -> (DistanceMatrix, Vec<i64>, Vec<i64>, Vec<i64>, Vec<i64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let (m, ids, cams) = (12usize, 6i64, 3i64);
    let q_pids: Vec<i64> = (0..m as i64).map(|i| i % ids).collect();
    let q_cams: Vec<i64> = vec![0; m];
    let mut g_pids = Vec::new();
    let mut g_cams = Vec::new();
    for pid in 0..ids {
        for cam in 0..cams {
            for _ in 0..2 {
                g_pids.push(pid);
                g_cams.push(cam);
            }
        }
    }
    g_pids.push(JUNK_PID);
    g_cams.push(1);
    let rows = (0..m)
        .map(|_| (0..g_pids.len()).map(|_| rng.gen_range(0.0..10.0)).collect())
        .collect();
    let n = g_pids.len();
    (DistanceMatrix::from_rows(rows, n).unwrap(), q_pids, q_cams, g_pids, g_cams)
}

#[test]
fn trivial_rank1_hit() {
    let d = embed(vec![vec![0.0, 0.0]], vec![vec![0.0, 0.0], vec![5.0, 5.0]]);
    let r = run(&d, (&[5], &[1]), (&[5, 7], &[2, 3]), &EvalOptions::default()).unwrap();
    assert_eq!(r.cmc, vec![1.0, 1.0]);
    assert_eq!(r.map, 1.0);
    assert_eq!(r.num_valid_queries, 1);
}

#[test]
fn same_identity_same_camera_is_excluded() {
    let d = embed(vec![vec![0.0, 0.0]], vec![vec![0.0, 0.0], vec![1.0, 1.0]]);
    let r = run(&d, (&[5], &[1]), (&[5, 5], &[1, 2]), &EvalOptions::default()).unwrap();
    assert_eq!(r.cmc, vec![1.0]);
    assert_eq!(r.map, 1.0);
}

#[test]
fn single_query_without_match_is_fatal() {
    let d = embed(vec![vec![0.0, 0.0]], vec![vec![0.0, 0.0], vec![1.0, 1.0]]);
    let err = run(&d, (&[9], &[1]), (&[5, 9], &[2, 1]), &EvalOptions::default()).unwrap_err();
    assert!(matches!(err, ReidError::NoValidQueries { total: 1 }));
}

#[test]
fn query_without_match_is_dropped_from_averages() {
    let d = embed(
        vec![vec![0.0, 0.0], vec![3.0, 3.0]],
        vec![vec![0.0, 0.0], vec![1.0, 1.0]],
    );
    let r = run(&d, (&[5, 9], &[1, 1]), (&[5, 7], &[2, 2]), &EvalOptions::default()).unwrap();
    assert_eq!(r.num_valid_queries, 1);
    assert_eq!(r.rank1(), 1.0);
    assert_eq!(r.map, 1.0);
}

#[test]
fn average_precision_over_multiple_hits() {
    // ranked: miss, hit, hit
    let d = DistanceMatrix::from_rows(vec![vec![0.1, 0.2, 0.3]], 3).unwrap();
    let r = run(&d, (&[1], &[0]), (&[2, 1, 1], &[1, 1, 2]), &EvalOptions::default()).unwrap();
    assert_eq!(r.cmc, vec![0.0, 1.0, 1.0]);
    assert!((r.map - (0.5 + 2.0 / 3.0) / 2.0).abs() < 1e-12);
}

#[test]
fn junk_entries_neither_hit_nor_occupy_rank() {
    let d = DistanceMatrix::from_rows(vec![vec![0.0, 0.5, 1.0]], 3).unwrap();
    let r = run(&d, (&[1], &[0]), (&[JUNK_PID, 1, 2], &[1, 1, 1]), &EvalOptions::default()).unwrap();
    assert_eq!(r.cmc, vec![1.0, 1.0]);
    assert_eq!(r.map, 1.0);
}

#[test]
fn ties_keep_gallery_order() {
    let d = DistanceMatrix::from_rows(vec![vec![1.0, 1.0]], 2).unwrap();
    let first_hit = run(&d, (&[1], &[0]), (&[1, 2], &[1, 1]), &EvalOptions::default()).unwrap();
    let first_miss = run(&d, (&[1], &[0]), (&[2, 1], &[1, 1]), &EvalOptions::default()).unwrap();
    assert_eq!(first_hit.rank1(), 1.0);
    assert_eq!(first_miss.rank1(), 0.0);
}

#[test]
fn cmc_is_monotone_bounded_and_complete() {
    for seed in 0..5 {
        let (d, qp, qc, gp, gc) = random_problem(seed);
        let r = run(&d, (&qp, &qc), (&gp, &gc), &EvalOptions::default()).unwrap();
        assert!(r.cmc.windows(2).all(|w| w[0] <= w[1]), "seed {seed}: {:?}", r.cmc);
        assert!(r.cmc.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert_eq!(*r.cmc.last().unwrap(), 1.0);
        assert!(r.map > 0.0 && r.map <= 1.0);
        assert_eq!(r.num_valid_queries, qp.len());
    }
}

#[test]
fn excluded_entries_do_not_reorder_the_rest() {
    // appending same-view entries for the query must not change anything
    let (d, qp, qc, gp, gc) = random_problem(11);
    let d1 = DistanceMatrix::from_rows(vec![d.row(0).to_vec()], gp.len()).unwrap();
    let base = run(&d1, (&qp[..1], &qc[..1]), (&gp, &gc), &EvalOptions::default()).unwrap();

    let mut row = d.row(0).to_vec();
    let mut gp2 = gp.clone();
    let mut gc2 = gc.clone();
    for dist in [0.0, 3.3, 7.7] {
        row.push(dist);
        gp2.push(qp[0]);
        gc2.push(qc[0]);
    }
    let n = row.len();
    let d2 = DistanceMatrix::from_rows(vec![row], n).unwrap();
    let with_excluded = run(&d2, (&qp[..1], &qc[..1]), (&gp2, &gc2), &EvalOptions::default()).unwrap();

    assert_eq!(base, with_excluded);
}

#[test]
fn evaluation_is_idempotent() {
    let (d, qp, qc, gp, gc) = random_problem(3);
    for opts in [EvalOptions::default(), EvalOptions { protocol: EvalProtocol::cuhk03(42), max_rank: None }] {
        let a = run(&d, (&qp, &qc), (&gp, &gc), &opts).unwrap();
        let b = run(&d, (&qp, &qc), (&gp, &gc), &opts).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.map.to_bits(), b.map.to_bits());
    }
}

#[test]
fn cuhk03_without_duplicates_matches_standard() {
    // one gallery entry per (identity, camera): subsampling keeps everything
    let d = DistanceMatrix::from_rows(vec![vec![0.4, 0.1, 0.9], vec![0.2, 0.3, 0.1]], 3).unwrap();
    let q = (&[1i64, 2][..], &[0i64, 0][..]);
    let g = (&[1i64, 2, 1][..], &[1i64, 1, 2][..]);
    let standard = run(&d, q, g, &EvalOptions::default()).unwrap();
    let cuhk = run(&d, q, g, &EvalOptions { protocol: EvalProtocol::cuhk03(7), max_rank: None }).unwrap();
    assert_eq!(standard.cmc, cuhk.cmc);
    assert!((standard.map - cuhk.map).abs() < 1e-12);
}

#[test]
fn cuhk03_curve_is_shorter_after_subsampling() {
    let (d, qp, qc, gp, gc) = random_problem(5);
    let standard = run(&d, (&qp, &qc), (&gp, &gc), &EvalOptions::default()).unwrap();
    let cuhk = run(&d, (&qp, &qc), (&gp, &gc), &EvalOptions { protocol: EvalProtocol::cuhk03(1), max_rank: None }).unwrap();
    assert!(cuhk.cmc.len() < standard.cmc.len());
    assert!(cuhk.cmc.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*cuhk.cmc.last().unwrap(), 1.0);
}

#[test]
fn max_rank_caps_curve_length() {
    let (d, qp, qc, gp, gc) = random_problem(2);
    let r = run(&d, (&qp, &qc), (&gp, &gc), &EvalOptions { protocol: EvalProtocol::Standard, max_rank: Some(5) }).unwrap();
    assert_eq!(r.cmc.len(), 5);
    assert_eq!(r.rank(5), Some(r.cmc[4]));
    assert_eq!(r.rank(6), None);
}

#[test]
fn empty_gallery_is_fatal() {
    let d = DistanceMatrix::from_rows(vec![vec![]], 0).unwrap();
    let err = run(&d, (&[1], &[0]), (&[], &[]), &EvalOptions::default()).unwrap_err();
    assert!(matches!(err, ReidError::EmptyGallery));
}

#[test]
fn label_length_mismatch_is_rejected() {
    let d = DistanceMatrix::from_rows(vec![vec![0.1, 0.2]], 2).unwrap();
    let err = run(&d, (&[1], &[0]), (&[1], &[1, 1]), &EvalOptions::default()).unwrap_err();
    assert!(matches!(err, ReidError::LengthMismatch { what: "gallery pids", expected: 2, actual: 1 }));
}
