use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use encoder::{
    Encoder, EncoderConfig, NextSequencePrediction, PretrainingModel, SequenceClassification,
    TokenClassification,
};

fn build_config() -> EncoderConfig {
    EncoderConfig {
        vocab_size: 32,
        hidden_size: 24,
        num_hidden_layers: 2,
        num_attention_heads: 4,
        intermediate_size: 28,
        max_position_embeddings: 64,
        type_vocab_size: 4,
        num_labels: 3,
        num_choices: 4,
        ..EncoderConfig::default()
    }
}

fn ids(shape: &[usize], bound: u32, device: &Device) -> Result<Tensor> {
    let count: usize = shape.iter().product();
    let data: Vec<u32> = (0..count).map(|_| fastrand::u32(0..bound)).collect();
    Ok(Tensor::from_vec(data, shape, device)?)
}

#[test]
fn backbone_shapes_follow_config() -> Result<()> {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let config = build_config();

    let model = Encoder::new(&config, vb)?;
    let input_ids = ids(&[2, 6], config.vocab_size as u32, &device)?;
    let mask = ids(&[2, 6], 2, &device)?;
    let segments = ids(&[2, 6], config.type_vocab_size as u32, &device)?;

    let (sequence_output, pooled_output) =
        model.forward(&input_ids, Some(&segments), Some(&mask), false)?;

    assert_eq!(sequence_output.dims(), &[2, 6, 24]);
    assert_eq!(pooled_output.dims(), &[2, 24]);
    assert_eq!(sequence_output.dtype(), DType::F32);
    Ok(())
}

#[test]
fn backbone_shapes_are_stable_across_draws() -> Result<()> {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let config = build_config();
    let model = Encoder::new(&config, vb)?;

    for _ in 0..3 {
        let input_ids = ids(&[3, 5], config.vocab_size as u32, &device)?;
        let (sequence_output, pooled_output) = model.forward(&input_ids, None, None, false)?;
        assert_eq!(sequence_output.dims(), &[3, 5, 24]);
        assert_eq!(pooled_output.dims(), &[3, 24]);
    }
    Ok(())
}

#[test]
fn next_sequence_head_scores_two_classes() -> Result<()> {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let config = build_config();

    let model = NextSequencePrediction::new(&config, vb)?;
    let input_ids = ids(&[3, 5], config.vocab_size as u32, &device)?;
    let labels = ids(&[3], 2, &device)?;

    let (score, loss) = model.forward(&input_ids, None, None, Some(&labels), false)?;

    assert_eq!(score.dims(), &[3, 2]);
    assert_eq!(loss.expect("labeled invocation").dims().len(), 0);
    Ok(())
}

#[test]
fn pretraining_head_returns_both_score_sets() -> Result<()> {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let config = build_config();

    let model = PretrainingModel::new(&config, vb)?;
    let input_ids = ids(&[2, 5], config.vocab_size as u32, &device)?;
    let token_labels = ids(&[2, 5], config.vocab_size as u32, &device)?;
    let sequence_labels = ids(&[2], 2, &device)?;

    let (prediction_scores, seq_relationship_score, loss) = model.forward(
        &input_ids,
        None,
        None,
        Some(&token_labels),
        Some(&sequence_labels),
        false,
    )?;

    assert_eq!(prediction_scores.dims(), &[2, 5, 32]);
    assert_eq!(seq_relationship_score.dims(), &[2, 2]);
    assert_eq!(loss.expect("labeled invocation").dims().len(), 0);
    Ok(())
}

#[test]
fn classification_heads_follow_label_space() -> Result<()> {
    let device = Device::Cpu;
    let config = build_config();
    let input_ids = ids(&[4, 6], config.vocab_size as u32, &device)?;
    let sequence_labels = ids(&[4], 2, &device)?;
    let token_labels = ids(&[4, 6], config.num_labels as u32, &device)?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let sequence_model = SequenceClassification::new(&config, vb)?;
    let (logits, loss) =
        sequence_model.forward(&input_ids, None, None, Some(&sequence_labels), false)?;
    assert_eq!(logits.dims(), &[4, 3]);
    assert_eq!(loss.expect("labeled invocation").dims().len(), 0);

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let token_model = TokenClassification::new(&config, vb)?;
    let (logits, loss) = token_model.forward(&input_ids, None, None, Some(&token_labels), false)?;
    assert_eq!(logits.dims(), &[4, 6, 3]);
    assert_eq!(loss.expect("labeled invocation").dims().len(), 0);
    Ok(())
}

#[test]
fn eval_mode_is_deterministic() -> Result<()> {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let config = build_config();
    let model = Encoder::new(&config, vb)?;
    let input_ids = ids(&[2, 4], config.vocab_size as u32, &device)?;

    let (first, _) = model.forward(&input_ids, None, None, false)?;
    let (second, _) = model.forward(&input_ids, None, None, false)?;

    let first = first.flatten_all()?.to_vec1::<f32>()?;
    let second = second.flatten_all()?.to_vec1::<f32>()?;
    assert_eq!(first, second);
    Ok(())
}
