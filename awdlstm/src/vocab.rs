//! Vocabulary parameters: the embedding matrix and the output projection.

use awdlstm_tch_ext::PathExt;
use tch::nn::Init;
use tch::{Kind, TchError, Tensor};

use crate::config::InitializerConfig;
use crate::cow::CowTensor;
use crate::error::{ConfigurationError, EncoderError};
use crate::layers::Dropout;
use crate::module::{FallibleModule, FallibleModuleT};

/// Vocabulary parameter configuration.
#[derive(Clone, Debug)]
pub struct VocabConfig {
    pub vocab_size: i64,
    pub emb_size: i64,

    /// Size of the hidden states that are projected to the vocabulary.
    pub hidden_size: i64,

    pub weight_tied: bool,
    pub use_bias: bool,
    pub initializer: InitializerConfig,
}

/// Input embeddings and output projection of the vocabulary.
///
/// The output projection maps hidden states to vocabulary logits using
/// a kernel of shape `[hidden_size, vocab_size]`. With weight tying,
/// there is no separate embedding matrix: the embeddings are the
/// transpose of the projection kernel and share its storage.
#[derive(Debug)]
pub struct VocabParameters {
    kernel: Tensor,
    bias: Option<Tensor>,
    embeddings: Option<Tensor>,
}

impl VocabParameters {
    /// Construct the vocabulary parameters.
    ///
    /// The projection variables are stored below `dense`. The
    /// projection kernel is registered for regularization.
    pub fn new(vs: &PathExt, config: &VocabConfig) -> Result<Self, EncoderError> {
        if config.weight_tied && config.emb_size != config.hidden_size {
            return Err(ConfigurationError::WeightTyingMismatch {
                emb_size: config.emb_size,
                hidden_size: config.hidden_size,
            }
            .into());
        }

        let dense = vs.sub("dense");
        let kernel = dense.var_regularized(
            "kernel",
            &[config.hidden_size, config.vocab_size],
            config
                .initializer
                .init(config.hidden_size, config.vocab_size),
        )?;
        let bias = if config.use_bias {
            Some(dense.var("bias", &[config.vocab_size], Init::Const(0.))?)
        } else {
            None
        };

        let embeddings = if config.weight_tied {
            None
        } else {
            Some(vs.var(
                "EncoderEmbeddingMatrix",
                &[config.vocab_size, config.emb_size],
                config.initializer.init(config.vocab_size, config.emb_size),
            )?)
        };

        Ok(VocabParameters {
            kernel,
            bias,
            embeddings,
        })
    }

    /// The embedding matrix, `[vocab_size, emb_size]`.
    pub fn as_embedding(&self) -> Result<CowTensor, TchError> {
        match self.embeddings {
            Some(ref embeddings) => Ok(CowTensor::Borrowed(embeddings)),
            None => Ok(CowTensor::Owned(self.kernel.f_transpose(0, 1)?)),
        }
    }

    /// The projection kernel, `[hidden_size, vocab_size]`.
    pub fn as_projection(&self) -> &Tensor {
        &self.kernel
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// The embedding matrix in the given kind, with dropout applied.
    ///
    /// Dropout is applied element-wise to the whole matrix.
    pub fn dropped_embedding(
        &self,
        keep_prob: f64,
        kind: Kind,
        train: bool,
    ) -> Result<Tensor, TchError> {
        let embeddings = self.as_embedding()?;
        let embeddings = CowTensor::cast(&embeddings, kind)?;
        Dropout::from_keep_prob(keep_prob).forward_t(&embeddings, train)
    }

    pub fn is_tied(&self) -> bool {
        self.embeddings.is_none()
    }

    pub fn vocab_size(&self) -> i64 {
        self.kernel.size()[1]
    }
}

impl FallibleModule for VocabParameters {
    type Error = TchError;

    /// Project hidden states to vocabulary logits.
    fn forward(&self, hidden: &Tensor) -> Result<Tensor, Self::Error> {
        let kernel = CowTensor::cast(&self.kernel, hidden.kind())?;
        let logits = hidden.f_matmul(&kernel)?;

        match self.bias {
            Some(ref bias) => logits.f_add(&*CowTensor::cast(bias, hidden.kind())?),
            None => Ok(logits),
        }
    }
}
