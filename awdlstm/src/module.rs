use std::fmt::Debug;

use tch::{Kind, Tensor};

/// Module for which a computation can fail.
pub trait FallibleModule: Debug + Send {
    /// The error type.
    type Error;

    /// Apply the module.
    fn forward(&self, input: &Tensor) -> Result<Tensor, Self::Error>;
}

/// Module for which a computation can fail.
pub trait FallibleModuleT: Debug + Send {
    /// The error type.
    type Error;

    /// Apply the module.
    fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor, Self::Error>;
}

impl<M> FallibleModuleT for M
where
    M: FallibleModule,
{
    type Error = M::Error;

    fn forward_t(&self, input: &Tensor, _train: bool) -> Result<Tensor, Self::Error> {
        self.forward(input)
    }
}

/// Module that is applied one time step at a time.
pub trait RecurrentModule: Debug {
    /// The recurrent state.
    type State;

    /// The error type.
    type Error;

    /// Get the initial state for a batch.
    ///
    /// Dropout masks that are fixed over a sequence are sampled here
    /// when `train` is `true`.
    fn zero_state(&self, batch_size: i64, kind: Kind, train: bool)
        -> Result<Self::State, Self::Error>;

    /// Apply the module to the input of one time step.
    ///
    /// The input has shape `[batch_size, input_size]`. Returns the
    /// output of shape `[batch_size, output_size]` and the new state.
    fn step(
        &self,
        input: &Tensor,
        state: &Self::State,
        train: bool,
    ) -> Result<(Tensor, Self::State), Self::Error>;
}
