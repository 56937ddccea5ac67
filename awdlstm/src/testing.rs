use crate::config::{CellParams, CellType, EncoderConfig};

/// A small untied two-layer LSTM encoder configuration.
pub(crate) fn small_config() -> EncoderConfig {
    EncoderConfig {
        batch_size: Some(2),
        core_cell: CellType::Lstm,
        core_cell_params: CellParams::with_num_units(6),
        dtype: None,
        emb_size: 4,
        encoder_dp_input_keep_prob: 1.0,
        encoder_dp_output_keep_prob: 1.0,
        encoder_emb_keep_prob: 1.0,
        encoder_last_input_keep_prob: 1.0,
        encoder_last_output_keep_prob: 1.0,
        encoder_layers: 2,
        encoder_use_skip_connections: false,
        end_token: 9,
        fc_use_bias: true,
        initializer: None,
        last_cell_params: Some(CellParams::with_num_units(4)),
        name: "rnn_encoder_awd".to_string(),
        num_tokens_gen: None,
        output_dim: 10,
        regularizer: None,
        regularizer_params: None,
        sampling_prob: 0.0,
        schedule_learning: false,
        seed_tokens: Some(vec![1, 2]),
        time_major: false,
        use_swap_memory: false,
        variational_recurrent: false,
        vocab_size: 10,
        weight_tied: false,
    }
}
