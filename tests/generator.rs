use approx::assert_abs_diff_eq;
use proptest::prelude::*;
use seqgan_generator::{Generator, GeneratorConfig, GeneratorError, ParameterSet, Tensor};

fn small_config() -> GeneratorConfig {
    GeneratorConfig {
        vocab_size: 5,
        emb_dim: 4,
        hidden_dim: 6,
        seq_len: 3,
        batch_size: 2,
        seed: Some(7),
        ..GeneratorConfig::default()
    }
}

fn targets() -> Tensor<usize> {
    Tensor::raw(&[2, 3], vec![1, 2, 3, 4, 0, 1]).unwrap()
}

/// Zero weights everywhere except the output bias, so every step's logits equal `bias`.
fn bias_only(config: &GeneratorConfig, bias: Vec<f32>) -> Generator {
    let mut params = ParameterSet::zeros(config);
    params.output_projection.b = Tensor::raw(&[config.vocab_size], bias).unwrap();
    Generator::with_parameters(config.clone(), params).unwrap()
}

fn log_sum_exp(values: &[f32]) -> f32 {
    values
        .iter()
        .map(|&v| f64::from(v).exp())
        .sum::<f64>()
        .ln() as f32
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn generate_respects_shape_and_vocabulary(
        vocab_size in 1usize..8,
        seq_len in 1usize..6,
        batch_size in 1usize..5,
        seed in any::<u64>(),
    ) {
        let config = GeneratorConfig {
            vocab_size,
            emb_dim: 3,
            hidden_dim: 4,
            seq_len,
            batch_size,
            seed: Some(seed),
            ..GeneratorConfig::default()
        };
        let mut generator = Generator::new(config).unwrap();
        let tokens = generator.generate().unwrap();
        prop_assert_eq!(tokens.shape(), &[batch_size, seq_len]);
        prop_assert!(tokens.blob().iter().all(|&t| t < vocab_size));
    }
}

#[test]
fn same_seed_same_samples() {
    let mut a = Generator::new(small_config()).unwrap();
    let mut b = Generator::new(small_config()).unwrap();
    assert_eq!(a.generate().unwrap(), b.generate().unwrap());

    a.reseed(99);
    b.reseed(99);
    let first = a.generate().unwrap();
    assert_eq!(first, b.generate().unwrap());
    a.reseed(99);
    assert_eq!(first, a.generate().unwrap());
}

#[test]
fn zero_weights_score_log_vocab() {
    let config = small_config();
    let generator = Generator::with_parameters(config.clone(), ParameterSet::zeros(&config)).unwrap();
    let losses = generator.losses(&targets()).unwrap();
    assert_eq!(losses.len(), 6);
    for loss in losses {
        assert_abs_diff_eq!(loss, 1.609_438, epsilon = 1e-4);
    }
}

#[test]
fn zero_weights_pretrain_loss_is_log_vocab() {
    let config = small_config();
    let mut generator =
        Generator::with_parameters(config.clone(), ParameterSet::zeros(&config)).unwrap();
    let loss = generator.pretrain_step(&targets()).unwrap();
    assert_abs_diff_eq!(loss, 5f32.ln(), epsilon = 1e-4);
}

#[test]
fn zero_rewards_leave_parameters_unchanged() {
    let mut generator = Generator::new(small_config()).unwrap();
    let before = generator.params().clone();
    let loss = generator
        .adversarial_step(&targets(), &Tensor::zeros(&[2, 3]))
        .unwrap();
    assert_eq!(loss, 0.0);
    assert_eq!(generator.params(), &before);
}

#[test]
fn improbable_target_is_clipped_to_exactly_45() {
    let generator = bias_only(&small_config(), vec![0.0, -100.0, 0.0, 0.0, 0.0]);
    let losses = generator.losses(&targets()).unwrap();
    // Token 1 is the target of row 0 step 0 and row 1 step 2.
    assert_eq!(losses[0], 45.0);
    assert_eq!(losses[5], 45.0);
    for &i in &[1, 2, 3, 4] {
        assert_abs_diff_eq!(losses[i], 4f32.ln(), epsilon = 1e-4);
    }
}

#[test]
fn losses_and_rewards_align_by_step_then_row() {
    let config = small_config();
    let bias = vec![0.0, 0.5, 1.0, 1.5, 2.0];
    let lse = log_sum_exp(&bias);
    let mut generator = bias_only(&config, bias.clone());
    let t = targets();

    let losses = generator.losses(&t).unwrap();
    for b in 0..2 {
        for i in 0..3 {
            let token = t.blob()[b * 3 + i];
            assert_abs_diff_eq!(losses[i * 2 + b], lse - bias[token], epsilon = 1e-4);
        }
    }

    let rewards = Tensor::raw(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let mut expected = 0.0;
    for b in 0..2 {
        for i in 0..3 {
            let token = t.blob()[b * 3 + i];
            expected += (lse - bias[token]) * rewards.blob()[b * 3 + i];
        }
    }
    let weighted = generator.adversarial_step(&t, &rewards).unwrap();
    assert_abs_diff_eq!(weighted, expected, epsilon = 1e-3);
}

#[test]
fn malformed_inputs_are_rejected_before_training() {
    let mut generator = Generator::new(small_config()).unwrap();
    let before = generator.training_state();

    let out_of_range = Tensor::raw(&[2, 3], vec![1, 2, 3, 4, 5, 1]).unwrap();
    assert!(matches!(
        generator.pretrain_step(&out_of_range),
        Err(GeneratorError::InvalidToken {
            token: 5,
            vocab_size: 5
        })
    ));

    let transposed = Tensor::raw(&[3, 2], vec![1, 2, 3, 4, 0, 1]).unwrap();
    assert!(matches!(
        generator.pretrain_step(&transposed),
        Err(GeneratorError::ShapeMismatch { what: "targets", .. })
    ));
    assert!(matches!(
        generator.losses(&transposed),
        Err(GeneratorError::ShapeMismatch { .. })
    ));
    assert!(matches!(
        generator.adversarial_step(&targets(), &Tensor::zeros(&[2, 4])),
        Err(GeneratorError::ShapeMismatch { what: "rewards", .. })
    ));

    assert_eq!(generator.training_state(), before);
}

#[test]
fn non_finite_gradient_aborts_the_update() {
    let mut generator = bias_only(&small_config(), vec![0.0, f32::NAN, 0.0, 0.0, 0.0]);
    let before = generator.training_state().to_bytes().unwrap();
    assert!(matches!(
        generator.pretrain_step(&targets()),
        Err(GeneratorError::NonFiniteGradient { .. })
    ));
    assert_eq!(generator.training_state().to_bytes().unwrap(), before);
}

#[test]
fn pretraining_learns_a_counting_corpus() {
    let config = GeneratorConfig {
        vocab_size: 4,
        emb_dim: 8,
        hidden_dim: 16,
        seq_len: 6,
        batch_size: 8,
        pretrain_learning_rate: 0.02,
        seed: Some(3),
        ..GeneratorConfig::default()
    };
    // Each row counts upward modulo 4 from its own offset.
    let blob = (0..8)
        .flat_map(|b| (0..6).map(move |j| (b + j) % 4))
        .collect();
    let corpus = Tensor::raw(&[8, 6], blob).unwrap();

    let mut generator = Generator::new(config).unwrap();
    let initial = generator.pretrain_step(&corpus).unwrap();
    let mut last = initial;
    for _ in 0..200 {
        last = generator.pretrain_step(&corpus).unwrap();
    }
    assert!(last.is_finite());
    assert!(
        last < 0.7 * initial,
        "loss went from {initial} to {last}"
    );
}

/// A model that deterministically emits the token after its input, modulo the vocabulary.
fn counting_generator(start_token: usize) -> Generator {
    let config = GeneratorConfig {
        vocab_size: 5,
        emb_dim: 5,
        hidden_dim: 5,
        seq_len: 4,
        batch_size: 2,
        start_token,
        seed: Some(11),
        ..GeneratorConfig::default()
    };
    let v = config.vocab_size;
    let mut params = ParameterSet::zeros(&config);
    for k in 0..v {
        params.embedding.blob_mut()[k * v + k] = 1.0;
        params.candidate_gate.w.blob_mut()[k * v + k] = 3.0;
        params.output_projection.w.blob_mut()[k * v + (k + 1) % v] = 200.0;
    }
    params.input_gate.b = Tensor::constant(&[v], 10.0);
    params.forget_gate.b = Tensor::constant(&[v], -10.0);
    params.output_gate.b = Tensor::constant(&[v], 10.0);
    Generator::with_parameters(config, params).unwrap()
}

#[test]
fn sampled_sequences_score_near_zero() {
    let mut generator = counting_generator(3);
    let samples = generator.generate().unwrap();
    assert_eq!(samples.blob(), &[4, 0, 1, 2, 4, 0, 1, 2]);
    for loss in generator.losses(&samples).unwrap() {
        assert!(loss < 1e-3, "loss {loss}");
    }

    // Rows stepping by two: every step's input predicts a different token than its target.
    let skipping = Tensor::raw(&[2, 4], vec![0, 2, 4, 1, 1, 3, 0, 2]).unwrap();
    for loss in generator.losses(&skipping).unwrap() {
        assert_eq!(loss, 45.0);
    }
}
