//! End-to-end scenarios exercising the public `Csm` driver: a stylised
//! no-error recovery, gapped cross-sectional times, a memory-1 longitudinal
//! identity, confidence-interval sanity, leave-one-period-out stability, and
//! a nearest-neighbour regulariser check.

use csm::{
    Csm, CsmConfig, CsmParams, ObservedData, PiInitMethod, Q0InitMethod, Regulariser, StoppingConditions,
};
use ndarray::{array, Array1, Array2};

/// S1: truth Π*, p0; generate P[:, t] = Π*^t . p0, fit with heuristic init.
#[test]
fn s1_stylised_no_error_recovery() {
    let truth = array![
        [0.8, 0.05, 0.05],
        [0.1, 0.9, 0.15],
        [0.1, 0.05, 0.8],
    ];
    let p0 = Array1::from(vec![0.26, 0.41, 0.33]);
    let t = 10;

    let mut probs = Array2::zeros((3, t));
    let mut state = p0.clone();
    probs.column_mut(0).assign(&state);
    for col in 1..t {
        state = truth.dot(&state);
        probs.column_mut(col).assign(&state);
    }

    let data = ObservedData {
        probs,
        nbr_surveys: Array1::from(vec![1000.0; t]),
        times: (0..t).map(|i| i as f64).collect(),
        ltrajs: csm::data::ObservedData::empty(3).ltrajs,
        ltimes: csm::data::ObservedData::empty(3).ltimes,
    };

    let csm_model = Csm::new(data, CsmParams::new(0, 1.0, 3, 0.0, None).unwrap()).unwrap();
    let mut pi = csm_model.calc_initial_guess_pi(PiInitMethod::Heuristic).unwrap();
    let mut q0 = csm_model.calc_initial_guess_q0(Q0InitMethod::FromData).unwrap();

    let stopping = StoppingConditions {
        maxeval: 2000,
        ..StoppingConditions::default()
    };
    let report = csm_model.estimate(&mut pi, &mut q0, stopping).unwrap();

    assert!(report.loss < 1e-3, "loss too high: {}", report.loss);
    let pi_err: f64 = (&pi - &truth).mapv(f64::abs).sum();
    assert!(pi_err < 0.05, "pi error too high: {pi_err}");
    let q0_err: f64 = (&q0 - &p0).mapv(f64::abs).sum();
    assert!(q0_err < 0.05, "q0 error too high: {q0_err}");
}

/// S2: cross-sectional observations at non-unit-step, gapped times; the
/// padded grid must cover the gaps and the fit must still recover truth.
#[test]
fn s2_gapped_cross_sectional_times_are_padded_and_recovered() {
    let truth = array![
        [0.8, 0.05, 0.05],
        [0.1, 0.9, 0.15],
        [0.1, 0.05, 0.8],
    ];
    let p0 = Array1::from(vec![0.26, 0.41, 0.33]);
    let observed_times = [0.0, 3.0, 4.0, 7.0];

    let mut state = p0.clone();
    let mut columns = vec![state.clone()];
    for t in 1..=7 {
        state = truth.dot(&state);
        if observed_times.contains(&(t as f64)) {
            columns.push(state.clone());
        }
    }
    let mut probs = Array2::zeros((3, observed_times.len()));
    for (col, s) in columns.iter().enumerate() {
        probs.column_mut(col).assign(s);
    }

    let data = ObservedData {
        probs,
        nbr_surveys: Array1::from(vec![1000.0; observed_times.len()]),
        times: observed_times.to_vec(),
        ltrajs: csm::data::ObservedData::empty(3).ltrajs,
        ltimes: csm::data::ObservedData::empty(3).ltimes,
    };

    assert_eq!(data.padded_len().unwrap(), 8);
    assert_eq!(data.input_to_padded().unwrap(), vec![0, 3, 4, 7]);

    let csm_model = Csm::new(data, CsmParams::new(0, 1.0, 3, 0.0, None).unwrap()).unwrap();
    let mut pi = csm_model.calc_initial_guess_pi(PiInitMethod::Identity).unwrap();
    let mut q0 = csm_model.calc_initial_guess_q0(Q0InitMethod::FromData).unwrap();

    let stopping = StoppingConditions {
        maxeval: 2000,
        ..StoppingConditions::default()
    };
    let report = csm_model.estimate(&mut pi, &mut q0, stopping).unwrap();

    assert!(report.loss < 1e-3, "loss too high: {}", report.loss);
    let pi_err: f64 = (&pi - &truth).mapv(f64::abs).sum();
    assert!(pi_err < 0.05, "pi error too high: {pi_err}");
}

/// S3: deterministic flip trajectories recovered by a memory-1 fit.
#[test]
fn s3_memory_one_longitudinal_identity() {
    // (i, j) -> if i == j then flip else repeat, for the newest pair.
    fn next(i: usize, j: usize) -> usize {
        if i == j {
            1 - j
        } else {
            j
        }
    }

    let mut rows = Vec::new();
    let mut times = Vec::new();
    for &(i0, j0) in &[(0usize, 0usize), (0, 1), (1, 0), (1, 1)] {
        let mut seq = vec![i0, j0];
        for _ in 0..9 {
            let len = seq.len();
            let n = next(seq[len - 2], seq[len - 1]);
            seq.push(n);
        }
        rows.push(seq);
        times.push((0..11).map(|i| i as f64).collect::<Vec<f64>>());
    }

    let data = ObservedData {
        probs: Array2::zeros((2, 0)),
        nbr_surveys: Array1::zeros(0),
        times: Vec::new(),
        ltrajs: csm::jagged::Jagged2DArray::from_rows(rows),
        ltimes: csm::jagged::Jagged2DArray::from_rows(times),
    };

    let csm_model = Csm::new(data, CsmParams::new(1, 1.0, 2, 0.0, None).unwrap()).unwrap();
    let mut pi = csm_model
        .calc_initial_guess_pi(PiInitMethod::FromTrajectories)
        .unwrap();
    let mut q0 = csm_model.calc_initial_guess_q0(Q0InitMethod::MaxEntropy).unwrap();

    let stopping = StoppingConditions {
        maxeval: 2000,
        ..StoppingConditions::default()
    };
    let report = csm_model.estimate(&mut pi, &mut q0, stopping).unwrap();

    assert!(report.loss < 6.0, "loss too high: {}", report.loss);
    // lifted states flattened (newest fastest): 0=(0,0) 1=(1,0) 2=(0,1) 3=(1,1)
    // deterministic transitions send (0,0)->(0,1), (0,1)->(1,1), (1,0)->(0,0), (1,1)->(1,0)
    assert!(pi[[1, 0]] > 0.9, "expected (0,0)->1 to dominate: {}", pi[[1, 0]]);
    assert!(pi[[1, 2]] > 0.9, "expected (0,1)->1 to dominate: {}", pi[[1, 2]]);
    assert!(pi[[0, 1]] > 0.9, "expected (1,0)->0 to dominate: {}", pi[[0, 1]]);
    assert!(pi[[0, 3]] > 0.9, "expected (1,1)->0 to dominate: {}", pi[[0, 3]]);
}

/// S4: analytic confidence bands bracket the fitted marginal everywhere.
#[test]
fn s4_analytic_confidence_interval_sanity() {
    let probs = array![
        [0.5, 0.4, 0.6],
        [0.3, 0.35, 0.25],
        [0.2, 0.25, 0.15],
    ];
    let data = ObservedData {
        probs,
        nbr_surveys: Array1::from(vec![800.0, 400.0, 808.0]),
        times: vec![0.0, 1.0, 2.0],
        ltrajs: csm::data::ObservedData::empty(3).ltrajs,
        ltimes: csm::data::ObservedData::empty(3).ltimes,
    };

    let csm_model = Csm::new(data, CsmParams::new(0, 1.0, 3, 0.0, None).unwrap()).unwrap();
    let mut pi = csm_model.calc_initial_guess_pi(PiInitMethod::MaxEntropy).unwrap();
    let mut q0 = csm_model.calc_initial_guess_q0(Q0InitMethod::FromData).unwrap();
    let stopping = StoppingConditions {
        maxeval: 500,
        ..StoppingConditions::default()
    };
    csm_model.estimate(&mut pi, &mut q0, stopping).unwrap();

    let ci = csm_model
        .extrapolate_analytic_confidence_intervals(&pi, &q0, 20, 0.95)
        .unwrap();

    for t in 0..20 {
        for k in 0..3 {
            let (l, p, u) = (ci.lower[[k, t]], ci.probs[[k, t]], ci.upper[[k, t]]);
            assert!(l <= p + 1e-9, "lower {l} exceeds fitted {p} at t={t},k={k}");
            assert!(p <= u + 1e-9, "fitted {p} exceeds upper {u} at t={t},k={k}");
            assert!((0.0..=1.0).contains(&l));
            assert!((0.0..=1.0).contains(&u));
        }
    }
}

/// S5: leave-one-period-out refits are stable away from the first period.
#[test]
fn s5_loocv_stability() {
    let truth = array![
        [0.8, 0.05, 0.05],
        [0.1, 0.9, 0.15],
        [0.1, 0.05, 0.8],
    ];
    let p0 = Array1::from(vec![0.26, 0.41, 0.33]);
    let t = 10;
    let mut probs = Array2::zeros((3, t));
    let mut state = p0.clone();
    probs.column_mut(0).assign(&state);
    for col in 1..t {
        state = truth.dot(&state);
        probs.column_mut(col).assign(&state);
    }
    let data = ObservedData {
        probs,
        nbr_surveys: Array1::from(vec![1000.0; t]),
        times: (0..t).map(|i| i as f64).collect(),
        ltrajs: csm::data::ObservedData::empty(3).ltrajs,
        ltimes: csm::data::ObservedData::empty(3).ltimes,
    };

    let params = CsmParams::new(0, 1.0, 3, 0.0, None).unwrap();
    let stopping = StoppingConditions {
        maxeval: 2000,
        ..StoppingConditions::default()
    };

    for (fold_idx, fold) in csm::data::LeaveOnePeriodOut::new(&data).enumerate() {
        let csm_model = Csm::new(fold, params.clone()).unwrap();
        let mut pi = csm_model.calc_initial_guess_pi(PiInitMethod::Heuristic).unwrap();
        let mut q0 = csm_model.calc_initial_guess_q0(Q0InitMethod::FromData).unwrap();
        let report = csm_model.estimate(&mut pi, &mut q0, stopping).unwrap();

        let threshold = if fold_idx == 0 { 5e-3 } else { 5e-6 };
        assert!(
            report.loss < threshold,
            "fold {fold_idx} loss {} exceeds {threshold}",
            report.loss
        );
    }
}

/// S6: with d_max=0, the nearest-neighbour penalty equals the sum of squared
/// off-tridiagonal entries of the expanded Π.
#[test]
fn s6_nearest_neighbour_regulariser_matches_hand_computation() {
    let pi = array![
        [0.5, 0.1, 0.3],
        [0.3, 0.8, 0.1],
        [0.2, 0.1, 0.6],
    ];
    let expanded = csm::markov::expand_transition_matrix(pi.view(), 3);

    let mut expected = 0.0;
    for from in 0..3 {
        for to in 0..3 {
            if (to as isize - from as isize).unsigned_abs() > 0 {
                expected += expanded[[to, from]] * expanded[[to, from]];
            }
        }
    }

    let regulariser = Regulariser::NearestNeighbour {
        max_dist_not_penalised: 0.0,
    };
    let pi_flat: Vec<f64> = pi.t().iter().copied().collect();
    let expanded_flat: Vec<f64> = {
        let mut v = vec![0.0; 9];
        for to in 0..3 {
            for from in 0..3 {
                v[to * 3 + from] = expanded[[to, from]];
            }
        }
        v
    };
    let q0 = vec![1.0 / 3.0; 3];
    let value = regulariser.calc(&pi_flat, &q0, &expanded_flat, 3, 3);

    assert!((value - expected).abs() < 1e-15, "{value} vs {expected}");
}

#[test]
fn config_defaults_are_internally_consistent() {
    let config = CsmConfig::default();
    assert!(config.validate().is_empty());
    let stopping = config.stopping_conditions();
    assert_eq!(stopping, StoppingConditions::default());
}
