use candle_core::{DType, Result, Tensor};
use candle_nn::{Dropout, Embedding, LayerNorm, Linear, Module, VarBuilder};

use crate::config::{Activation, EncoderConfig};

const LAYER_NORM_EPS: f64 = 1e-12;

/// Token, position and segment-type embeddings summed into one
/// `(batch, seq, hidden)` representation.
#[derive(Debug)]
pub struct EncoderEmbeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    token_type_embeddings: Embedding,
    layer_norm: LayerNorm,
    dropout: Dropout,
}

impl EncoderEmbeddings {
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let word_embeddings = candle_nn::embedding(
            config.vocab_size,
            config.hidden_size,
            vb.pp("word_embeddings"),
        )?;
        let position_embeddings = candle_nn::embedding(
            config.max_position_embeddings,
            config.hidden_size,
            vb.pp("position_embeddings"),
        )?;
        let token_type_embeddings = candle_nn::embedding(
            config.type_vocab_size,
            config.hidden_size,
            vb.pp("token_type_embeddings"),
        )?;
        let layer_norm =
            candle_nn::layer_norm(config.hidden_size, LAYER_NORM_EPS, vb.pp("LayerNorm"))?;
        let dropout = Dropout::new(config.hidden_dropout_prob);

        Ok(Self {
            word_embeddings,
            position_embeddings,
            token_type_embeddings,
            layer_norm,
            dropout,
        })
    }

    /// Looks up and sums the three embedding tables.
    ///
    /// `input_ids` is `(batch, seq)`; absent segment ids default to
    /// segment zero for every position.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let (_batch_size, seq_len) = input_ids.dims2()?;

        let words = self.word_embeddings.forward(input_ids)?;

        let position_ids = Tensor::arange(0u32, seq_len as u32, input_ids.device())?;
        let positions = self
            .position_embeddings
            .forward(&position_ids)?
            .unsqueeze(0)?
            .broadcast_as(words.shape())?;

        let segments = match token_type_ids {
            Some(ids) => self.token_type_embeddings.forward(ids)?,
            None => {
                let zeros = input_ids.zeros_like()?;
                self.token_type_embeddings.forward(&zeros)?
            }
        };

        let summed = words.add(&positions)?.add(&segments)?;
        let normed = self.layer_norm.forward(&summed)?;
        self.dropout.forward(&normed, train)
    }
}

/// Bidirectional multi-head self-attention over the full sequence.
#[derive(Debug)]
pub struct SelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    dropout: Dropout,
    num_heads: usize,
    head_dim: usize,
    scale: f64,
}

impl SelfAttention {
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = config.hidden_size;
        let query = candle_nn::linear(hidden, hidden, vb.pp("query"))?;
        let key = candle_nn::linear(hidden, hidden, vb.pp("key"))?;
        let value = candle_nn::linear(hidden, hidden, vb.pp("value"))?;
        let dropout = Dropout::new(config.attention_probs_dropout_prob);
        let head_dim = config.head_dim();
        let scale = 1.0 / (head_dim as f64).sqrt();

        Ok(Self {
            query,
            key,
            value,
            dropout,
            num_heads: config.num_attention_heads,
            head_dim,
            scale,
        })
    }

    /// `(batch, seq, hidden)` -> `(batch, heads, seq, head_dim)`
    fn split_heads(&self, tensor: &Tensor) -> Result<Tensor> {
        let (batch, seq, _) = tensor.dims3()?;
        tensor
            .reshape((batch, seq, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    /// Attends every position to every unmasked position.
    ///
    /// `attention_bias`, when present, is an additive `(batch, 1, 1, seq)`
    /// tensor holding `0` for visible positions and a large negative value
    /// for masked ones.
    pub fn forward(
        &self,
        hidden: &Tensor,
        attention_bias: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let (batch, seq, hidden_size) = hidden.dims3()?;

        let queries = self.split_heads(&self.query.forward(hidden)?)?;
        let keys = self.split_heads(&self.key.forward(hidden)?)?;
        let values = self.split_heads(&self.value.forward(hidden)?)?;

        // (batch, heads, seq, seq)
        let scores = queries.matmul(&keys.t()?)?.affine(self.scale, 0.0)?;
        let scores = match attention_bias {
            Some(bias) => scores.broadcast_add(bias)?,
            None => scores,
        };

        let probs = candle_nn::ops::softmax_last_dim(&scores)?;
        let probs = self.dropout.forward(&probs, train)?;

        let context = probs.matmul(&values)?;
        context
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq, hidden_size))
    }
}

/// One encoder layer: self-attention and feed-forward, each followed by
/// a residual add and layer norm (post-norm layout, matching the weight
/// layout of published checkpoints).
#[derive(Debug)]
pub struct EncoderLayer {
    attention: SelfAttention,
    attention_output: Linear,
    attention_norm: LayerNorm,
    intermediate: Linear,
    activation: Activation,
    output: Linear,
    output_norm: LayerNorm,
    dropout: Dropout,
}

impl EncoderLayer {
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = config.hidden_size;
        let attention = SelfAttention::new(config, vb.pp("attention").pp("self"))?;
        let attention_output =
            candle_nn::linear(hidden, hidden, vb.pp("attention").pp("output").pp("dense"))?;
        let attention_norm = candle_nn::layer_norm(
            hidden,
            LAYER_NORM_EPS,
            vb.pp("attention").pp("output").pp("LayerNorm"),
        )?;
        let intermediate = candle_nn::linear(
            hidden,
            config.intermediate_size,
            vb.pp("intermediate").pp("dense"),
        )?;
        let output =
            candle_nn::linear(config.intermediate_size, hidden, vb.pp("output").pp("dense"))?;
        let output_norm =
            candle_nn::layer_norm(hidden, LAYER_NORM_EPS, vb.pp("output").pp("LayerNorm"))?;
        let dropout = Dropout::new(config.hidden_dropout_prob);

        Ok(Self {
            attention,
            attention_output,
            attention_norm,
            intermediate,
            activation: config.hidden_act,
            output,
            output_norm,
            dropout,
        })
    }

    pub fn forward(
        &self,
        hidden: &Tensor,
        attention_bias: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let context = self.attention.forward(hidden, attention_bias, train)?;
        let attention_out = self.attention_output.forward(&context)?;
        let attention_out = self.dropout.forward(&attention_out, train)?;
        let hidden = self.attention_norm.forward(&hidden.add(&attention_out)?)?;

        let intermediate = self
            .activation
            .forward(&self.intermediate.forward(&hidden)?)?;
        let ffn_out = self.output.forward(&intermediate)?;
        let ffn_out = self.dropout.forward(&ffn_out, train)?;
        self.output_norm.forward(&hidden.add(&ffn_out)?)
    }
}

/// Projects the first-token representation through a tanh-activated
/// linear layer, producing one vector per example.
#[derive(Debug)]
pub struct Pooler {
    dense: Linear,
}

impl Pooler {
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let dense = candle_nn::linear(config.hidden_size, config.hidden_size, vb.pp("dense"))?;
        Ok(Self { dense })
    }

    pub fn forward(&self, sequence_output: &Tensor) -> Result<Tensor> {
        let first_token = sequence_output.narrow(1, 0, 1)?.squeeze(1)?;
        self.dense.forward(&first_token)?.tanh()
    }
}

/// Shared representation computer for the whole model family.
///
/// Produces a `(batch, seq, hidden)` sequence representation and a
/// `(batch, hidden)` pooled representation; every task head sits on top
/// of one of the two.
#[derive(Debug)]
pub struct Encoder {
    config: EncoderConfig,
    embeddings: EncoderEmbeddings,
    layers: Vec<EncoderLayer>,
    pooler: Pooler,
}

impl Encoder {
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;

        let embeddings = EncoderEmbeddings::new(config, vb.pp("embeddings"))?;
        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for index in 0..config.num_hidden_layers {
            layers.push(EncoderLayer::new(
                config,
                vb.pp("encoder").pp(format!("layer.{index}")),
            )?);
        }
        let pooler = Pooler::new(config, vb.pp("pooler"))?;

        Ok(Self {
            config: config.clone(),
            embeddings,
            layers,
            pooler,
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Turns a binary `(batch, seq)` visibility mask into the additive
    /// bias added to raw attention scores: `0` where the mask is one,
    /// `-10000` where it is zero.
    fn attention_bias(attention_mask: &Tensor) -> Result<Tensor> {
        let (batch, seq) = attention_mask.dims2()?;
        attention_mask
            .to_dtype(DType::F32)?
            .affine(10000.0, -10000.0)?
            .reshape((batch, 1, 1, seq))
    }

    /// Runs the full stack and returns `(sequence_output, pooled_output)`.
    ///
    /// Absent `attention_mask` means every position is visible; absent
    /// `token_type_ids` means segment zero everywhere.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let bias = match attention_mask {
            Some(mask) => Some(Self::attention_bias(mask)?),
            None => None,
        };

        let mut hidden = self.embeddings.forward(input_ids, token_type_ids, train)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, bias.as_ref(), train)?;
        }

        let pooled = self.pooler.forward(&hidden)?;
        Ok((hidden, pooled))
    }
}
