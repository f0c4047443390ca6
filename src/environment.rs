use std::{cell::RefCell, collections::HashMap, rc::Rc};

use crate::{error::SkiffError, value::{EvaluationResult, Value}};


/// One lexical scope. Closures hold their defining frame through an `Rc`, so
/// every closure created in the same scope observes the same bindings.
#[derive(Debug)]
pub(crate) struct Environment {
    bindings: RefCell<HashMap<Rc<str>, Value>>,
    parent: Option<Rc<Environment>>,
}

impl Environment {
    pub(crate) fn root(bindings: HashMap<Rc<str>, Value>) -> Rc<Self> {
        Rc::new(Self {
            bindings: RefCell::new(bindings),
            parent: None,
        })
    }

    pub(crate) fn new(parent: Rc<Environment>) -> Rc<Self> {
        Rc::new(Self {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(parent),
        })
    }

    fn frames(&self) -> impl Iterator<Item = &Environment> {
        std::iter::successors(Some(self), |frame| frame.parent.as_deref())
    }

    pub(crate) fn lookup(&self, name: &str) -> EvaluationResult {
        self.frames()
            .find_map(|frame| frame.bindings.borrow().get(name).cloned())
            .ok_or_else(|| SkiffError::UnboundIdentifier(name.to_owned()))
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.frames().any(|frame| frame.bindings.borrow().contains_key(name))
    }

    /// Inserts or overwrites in this frame only.
    pub(crate) fn bind(&self, name: Rc<str>, value: Value) {
        self.bindings.borrow_mut().insert(name, value);
    }

    /// Rebinds the nearest existing binding of `name`.
    pub(crate) fn set(&self, name: &str, value: Value) -> Result<(), SkiffError> {
        match self.frames().find(|frame| frame.bindings.borrow().contains_key(name)) {
            Some(frame) => {
                if let Some(slot) = frame.bindings.borrow_mut().get_mut(name) {
                    *slot = value;
                }
                Ok(())
            }
            None => Err(SkiffError::UnboundIdentifier(name.to_owned())),
        }
    }
}
