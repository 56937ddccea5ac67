use std::cell::RefCell;
use std::rc::Rc;

use itertools::Itertools;
use tch::nn::{Init, Path, VarStore};
use tch::{Device, TchError, Tensor};

/// Trait that provides the root of a variable store.
pub trait RootExt {
    /// Get the root of a variable store.
    ///
    /// In contrast to the regular `root` method, `root_ext` allows
    /// you to provide a function that maps a variable name to a
    /// parameter group. This is useful to give parts of a model
    /// (e.g. the embeddings and the recurrent cells) their own
    /// optimizer hyper-parameters.
    ///
    /// The returned path also keeps track of the variables that were
    /// created with [`PathExt::var_regularized`].
    fn root_ext<F>(&self, parameter_group_fun: F) -> PathExt
    where
        F: 'static + Fn(&str) -> usize;
}

impl RootExt for VarStore {
    fn root_ext<F>(&self, parameter_group_fun: F) -> PathExt
    where
        F: 'static + Fn(&str) -> usize,
    {
        PathExt {
            inner: self.root(),
            parameter_group_fun: Rc::new(parameter_group_fun),
            regularized: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

/// A variable that a weight regularizer should be applied to.
#[derive(Debug)]
pub struct RegularizedVariable {
    /// Full name of the variable in the variable store.
    pub name: String,

    /// The variable.
    pub tensor: Tensor,
}

pub struct PathExt<'a> {
    inner: Path<'a>,
    parameter_group_fun: Rc<dyn Fn(&str) -> usize>,
    regularized: Rc<RefCell<Vec<RegularizedVariable>>>,
}

impl<'a> PathExt<'a> {
    /// The device on which variables are created.
    pub fn device(&self) -> Device {
        self.inner.device()
    }

    /// Create a tensor variable initialized with ones.
    pub fn ones(&self, name: &str, dims: &[i64]) -> Tensor {
        let group = self.name_group(name);
        let path = self.inner.set_group(group);
        path.ones(name, dims)
    }

    /// Get the variables that were registered for regularization.
    ///
    /// All paths that were derived from the same root share one
    /// registry, so this returns the regularized variables of the
    /// whole variable store. The tensors share storage with the
    /// variables.
    pub fn regularized_variables(&self) -> Vec<RegularizedVariable> {
        self.regularized
            .borrow()
            .iter()
            .map(|var| RegularizedVariable {
                name: var.name.clone(),
                tensor: var.tensor.shallow_clone(),
            })
            .collect()
    }

    /// Get a sub-path of the current path.
    pub fn sub<T: ToString>(&'a self, s: T) -> PathExt<'a> {
        PathExt {
            inner: self.inner.sub(s),
            parameter_group_fun: self.parameter_group_fun.clone(),
            regularized: self.regularized.clone(),
        }
    }

    /// Create a tensor variable initialized with the given initializer.
    pub fn var(&self, name: &str, dims: &[i64], init: Init) -> Result<Tensor, TchError> {
        let group = self.name_group(name);
        let path = self.inner.set_group(group);
        path.f_var(name, dims, init)
    }

    /// Create a tensor variable and register it for regularization.
    pub fn var_regularized(
        &self,
        name: &str,
        dims: &[i64],
        init: Init,
    ) -> Result<Tensor, TchError> {
        let tensor = self.var(name, dims, init)?;

        self.regularized.borrow_mut().push(RegularizedVariable {
            name: self.full_name(name),
            tensor: tensor.shallow_clone(),
        });

        Ok(tensor)
    }

    /// Create a tensor variable initialized with zeros.
    pub fn zeros(&self, name: &str, dims: &[i64]) -> Tensor {
        let group = self.name_group(name);
        let path = self.inner.set_group(group);
        path.zeros(name, dims)
    }

    fn full_name(&self, name: &str) -> String {
        let prefix = self.inner.components().join(".");
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", prefix, name)
        }
    }

    /// Get the full name of `name` and return its group.
    fn name_group(&self, name: &str) -> usize {
        (self.parameter_group_fun)(&self.full_name(name))
    }
}
