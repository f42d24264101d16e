//! End-to-end tests through the public API.

use std::collections::BTreeMap;

use relgat::nn::gnn::broadcast_instructions;
use relgat::prelude::*;

fn approx_eq(a: &[f32], b: &[f32], tol: f32) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < tol)
}

fn ramp(shape: &[usize], scale: f32) -> Tensor {
    let n: usize = shape.iter().product();
    let data: Vec<f32> = (0..n).map(|i| ((i % 7) as f32 - 3.0) * scale).collect();
    Tensor::new(&data, shape)
}

// ==================== Attention Layer ====================

#[test]
fn test_two_head_mean_layer_shapes_and_normalization() {
    let x = ramp(&[3, 4], 0.3);
    let edges = EdgeIndex::from_pairs(&[[0, 1], [1, 2]]);
    let edge_attr = ramp(&[2, 3], 0.5);

    let config = GatConfig::new(4, 5, 3).with_heads(2).with_concat(false);
    let conv = EdgeGatConv::with_seed(config, Some(1)).expect("valid config");
    let mut rng = seeded_rng(0);

    let (out, attention) = conv
        .forward_with_attention(&x, &edges, &edge_attr, &mut rng)
        .expect("forward");

    assert_eq!(out.shape(), &[3, 5]);
    assert_eq!(attention.weights.shape(), &[5, 2]);
    assert_eq!(attention.edge_index.num_edges(), 5);
    assert!(!edges.has_self_loops());
    assert!(attention.edge_index.has_self_loops());

    let sums = attention.target_sums(3).expect("targets in range");
    assert!(approx_eq(sums.data(), &[1.0; 6], 1e-5));
}

#[test]
fn test_isolated_node_receives_only_bias() {
    let x = ramp(&[3, 4], 0.2);
    let edges = EdgeIndex::from_pairs(&[[0, 1]]);
    let edge_attr = ramp(&[1, 2], 1.0);

    let config = GatConfig::new(4, 3, 2).with_heads(2).without_self_loops();
    let mut conv = EdgeGatConv::with_seed(config, Some(3)).expect("valid config");
    for (name, p) in conv.named_parameters_mut() {
        if name == "bias" {
            p.data_mut().copy_from_slice(&[0.5, -0.5, 1.0, 2.0, 0.0, -1.0]);
        }
    }
    let mut rng = seeded_rng(0);
    let out = conv.forward(&x, &edges, &edge_attr, &mut rng).expect("forward");

    assert_eq!(out.shape(), &[3, 6]);
    // nodes 0 and 2 have no incoming edge
    assert_eq!(out.row(0), &[0.5, -0.5, 1.0, 2.0, 0.0, -1.0]);
    assert_eq!(out.row(2), &[0.5, -0.5, 1.0, 2.0, 0.0, -1.0]);
    assert_ne!(out.row(1), out.row(0));
}

#[test]
fn test_bipartite_layer_outputs_one_row_per_target() {
    let x_src = ramp(&[4, 3], 0.4);
    let x_tgt = ramp(&[2, 5], 0.1);
    let edges = EdgeIndex::from_pairs(&[[0, 0], [1, 0], [3, 1]]);
    let edge_attr = ramp(&[3, 2], 0.7);

    let config = GatConfig::new(3, 4, 2)
        .with_heads(3)
        .with_bipartite(5)
        .without_self_loops();
    let conv = EdgeGatConv::with_seed(config, Some(9)).expect("valid config");
    let mut rng = seeded_rng(0);

    let (out, attention) = conv
        .forward_with_attention((&x_src, &x_tgt), &edges, &edge_attr, &mut rng)
        .expect("forward");
    assert_eq!(out.shape(), &[2, 12]);

    let sums = attention.target_sums(2).expect("targets in range");
    assert!(approx_eq(sums.data(), &[1.0; 6], 1e-5));
    // target 1 has a single incoming edge
    assert!(approx_eq(attention.weights.row(2), &[1.0, 1.0, 1.0], 1e-6));
}

#[test]
fn test_edge_out_of_range_is_rejected() {
    let x = Tensor::ones(&[2, 4]);
    let edges = EdgeIndex::from_pairs(&[[0, 5]]);
    let edge_attr = Tensor::ones(&[1, 3]);
    let conv = EdgeGatConv::with_seed(GatConfig::new(4, 2, 3), Some(0)).expect("valid config");
    let mut rng = seeded_rng(0);

    let err = conv.forward(&x, &edges, &edge_attr, &mut rng).unwrap_err();
    assert!(matches!(err, RelGatError::InvalidEdgeIndex { .. }));
}

// ==================== Stack ====================

#[test]
fn test_instructions_broadcast_per_graph() {
    let instructions = Tensor::new(&[1.0, 10.0, 2.0, 20.0], &[2, 2]);
    let batch = [0, 0, 1, 1, 1];
    let per_node = broadcast_instructions(&instructions, &batch).expect("valid batch");
    assert_eq!(per_node.shape(), &[5, 2]);
    assert_eq!(
        per_node.data(),
        &[1.0, 10.0, 1.0, 10.0, 2.0, 20.0, 2.0, 20.0, 2.0, 20.0]
    );

    // edges take the instruction of their source's graph
    let edges = EdgeIndex::from_pairs(&[[0, 1], [3, 2], [4, 4]]);
    let edge_batch: Vec<usize> = edges.src().iter().map(|&s| batch[s]).collect();
    let per_edge = broadcast_instructions(&instructions, &edge_batch).expect("valid batch");
    assert_eq!(per_edge.data(), &[1.0, 10.0, 2.0, 20.0, 2.0, 20.0]);
}

#[test]
fn test_stack_over_two_graphs() {
    let config = GatStackConfig::new(6, 6, 3, 2, 3).with_heads(2);
    let mut stack = GatStack::with_seed(config, Some(11)).expect("valid config");
    assert_eq!(stack.num_layers(), 3);
    assert_eq!(stack.bns().len(), 2);

    let x = ramp(&[5, 6], 0.25);
    let edges = EdgeIndex::from_pairs(&[[0, 1], [1, 0], [2, 3], [3, 4], [4, 2]]);
    let edge_attr = ramp(&[5, 3], 0.5);
    let instructions = ramp(&[3, 2, 2], 0.1);
    let batch = [0, 0, 1, 1, 1];
    let mut rng = seeded_rng(4);

    let out = stack
        .forward(&x, &edges, &edge_attr, &instructions, &batch, &mut rng)
        .expect("forward");
    assert_eq!(out.shape(), &[5, 6]);
    assert!(out.data().iter().all(|v| v.is_finite()));
}

#[test]
fn test_stack_eval_is_deterministic() {
    let config = GatStackConfig::new(4, 4, 2, 3, 2).with_dropout(0.5);
    let mut stack = GatStack::with_seed(config, Some(5)).expect("valid config");
    set_mode(&mut stack, false);

    let x = ramp(&[3, 4], 0.3);
    let edges = EdgeIndex::from_pairs(&[[0, 1], [1, 2], [2, 0]]);
    let edge_attr = ramp(&[3, 2], 0.2);
    let instructions = ramp(&[2, 1, 3], 0.4);

    let a = stack
        .forward(&x, &edges, &edge_attr, &instructions, &[0, 0, 0], &mut seeded_rng(1))
        .expect("forward");
    let b = stack
        .forward(&x, &edges, &edge_attr, &instructions, &[0, 0, 0], &mut seeded_rng(2))
        .expect("forward");
    assert_eq!(a, b);
}

#[test]
fn test_stack_rejects_wrong_instruction_count() {
    let config = GatStackConfig::new(4, 4, 2, 3, 2);
    let mut stack = GatStack::with_seed(config, Some(0)).expect("valid config");
    let err = stack
        .forward(
            &Tensor::ones(&[2, 4]),
            &EdgeIndex::from_pairs(&[[0, 1]]),
            &Tensor::ones(&[1, 2]),
            &Tensor::ones(&[3, 1, 3]),
            &[0, 0],
            &mut seeded_rng(0),
        )
        .unwrap_err();
    assert!(matches!(err, RelGatError::ConfigurationMismatch(_)));
}

#[test]
fn test_stack_rejects_width_change() {
    let config = GatStackConfig::new(4, 8, 2, 3, 2);
    let err = GatStack::with_seed(config, Some(0)).unwrap_err();
    assert!(matches!(err, RelGatError::ConfigurationMismatch(_)));
}

// ==================== Training Loop ====================

#[test]
fn test_training_step_moves_parameters() {
    let train = TrainConfig {
        steps: vec![0],
        seed: Some(21),
        ..TrainConfig::default()
    };
    let config = GatStackConfig::new(4, 4, 2, 2, 2).with_heads(2);
    let mut stack = GatStack::with_seed(config, train.seed).expect("valid config");
    let (mut optimizer, mut scheduler) =
        build_optimizer(&stack, train.lr, &train, -1, None).expect("optimizer");

    let mut rng = train.rng();
    let out = stack
        .forward(
            &ramp(&[3, 4], 0.3),
            &EdgeIndex::from_pairs(&[[0, 1], [1, 2]]),
            &ramp(&[2, 2], 0.2),
            &ramp(&[2, 1, 2], 0.4),
            &[0, 0, 0],
            &mut rng,
        )
        .expect("forward");
    assert_eq!(out.shape(), &[3, 4]);

    let before = state_dict(&stack);
    for (_, p) in stack.named_parameters_mut() {
        let grad = Tensor::full(p.shape(), 10.0);
        p.set_grad(grad).expect("same shape");
    }
    let norms = grad_clip(&mut stack, train.clip);
    assert!(norms.total_norm > train.clip);

    optimizer.step(&mut stack);
    optimizer.zero_grad(&mut stack);
    scheduler.step(&mut optimizer);

    for (name, p) in stack.named_parameters() {
        assert_ne!(&before[&name], p, "{name} did not move");
        assert!(p.grad().is_none());
    }
    // group 0 holds the reduced-rate prefixes
    let lrs = optimizer.group_lrs();
    assert!((lrs[0] - train.lr / 10.0 * train.lr_decay).abs() < 1e-9);
    assert!((lrs[1] - train.lr * train.lr_decay).abs() < 1e-9);
}

// ==================== Checkpoints ====================

#[test]
fn test_checkpoint_roundtrip_restores_weights() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ckpt.safetensors");

    let config = GatStackConfig::new(4, 4, 2, 2, 2);
    let source = GatStack::with_seed(config.clone(), Some(1)).expect("valid config");
    let mut extra = BTreeMap::new();
    extra.insert("epoch".to_string(), "7".to_string());
    assert!(save_checkpoint(&path, &source, None, &extra).expect("save"));

    let checkpoint = load_checkpoint(&path).expect("load");
    assert_eq!(checkpoint.epoch(), Some(7));
    assert!(checkpoint.optimizer.is_none());

    let mut target = GatStack::with_seed(config, Some(2)).expect("valid config");
    assert_ne!(state_dict(&target), state_dict(&source));
    let report = optimistic_restore(&mut target, &checkpoint.state_dict, &RestoreOptions::default());
    assert!(report.is_clean());
    assert_eq!(state_dict(&target), state_dict(&source));
}

#[test]
fn test_resume_with_optimizer_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ckpt.safetensors");

    let config = GatStackConfig::new(4, 4, 2, 2, 1);
    let mut model = GatStack::with_seed(config.clone(), Some(1)).expect("valid config");
    let train = TrainConfig::default();
    let (mut optimizer, _) = build_optimizer(&model, train.lr, &train, -1, None).expect("optimizer");
    for (_, p) in model.named_parameters_mut() {
        p.set_grad(Tensor::ones(p.shape())).expect("same shape");
    }
    optimizer.step(&mut model);

    let mut extra = BTreeMap::new();
    extra.insert("epoch".to_string(), "3".to_string());
    save_checkpoint(&path, &model, Some(&optimizer), &extra).expect("save");

    let checkpoint = load_checkpoint(&path).expect("load");
    let mut fresh = GatStack::with_seed(config, Some(9)).expect("valid config");
    let (start_epoch, report) =
        relgat::checkpoint::resume(&mut fresh, &checkpoint, &RestoreOptions::default());
    assert_eq!(start_epoch, 3);
    assert!(report.is_clean());

    let (restored, _) =
        build_optimizer(&fresh, train.lr, &train, start_epoch, Some(&checkpoint)).expect("optimizer");
    assert_eq!(restored.state(), optimizer.state());
}

#[test]
fn test_restore_into_deeper_stack_reports_missing_layer() {
    let small = GatStack::with_seed(GatStackConfig::new(4, 4, 2, 2, 1), Some(1)).expect("valid");
    let mut deep = GatStack::with_seed(GatStackConfig::new(4, 4, 2, 2, 2), Some(2)).expect("valid");

    let report = optimistic_restore(&mut deep, &state_dict(&small), &RestoreOptions::default());
    assert!(!report.is_clean());
    assert!(report.unexpected.is_empty());
    assert!(report.mismatched.is_empty());
    assert!(report.missing.iter().any(|n| n.starts_with("convs.1.")));
    assert!(report.missing.iter().any(|n| n.starts_with("bns.0.")));
    assert!(report.restored.iter().all(|n| n.starts_with("convs.0.")));
}
