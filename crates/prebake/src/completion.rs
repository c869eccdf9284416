use crate::{
    abstract_value::AbstractId,
    ast::CodeRange,
    diagnostics::FatalError,
    intern::StringId,
    value::Value,
};

/// An abrupt completion.
///
/// `Break` and `Continue` carry an optional completion value (`None` is the
/// Standard's *empty*), which `UpdateEmpty` fills from the surrounding
/// statement list.
#[derive(Debug, Clone)]
pub enum AbruptCompletion {
    Throw {
        value: Value,
        loc: CodeRange,
    },
    Break {
        label: Option<StringId>,
        value: Option<Value>,
    },
    Continue {
        label: Option<StringId>,
        value: Option<Value>,
    },
    Return {
        value: Value,
    },
    /// Both branches of a join were abrupt; the runtime outcome depends on the
    /// abstract condition.
    Joined(Box<JoinedAbrupt>),
}

/// Two abrupt branches joined under an abstract condition.
#[derive(Debug, Clone)]
pub struct JoinedAbrupt {
    pub condition: AbstractId,
    pub consequent: AbruptCompletion,
    pub alternate: AbruptCompletion,
}

/// A join left one side normal: the interpreter continues down the normal
/// side while remembering that the abrupt side happens when `condition`
/// disagrees.
#[derive(Debug, Clone)]
pub struct PossiblyNormal {
    pub condition: AbstractId,
    /// Whether the consequent branch was the normal one.
    pub normal_is_consequent: bool,
    pub normal_value: Option<Value>,
    pub abrupt: AbruptCompletion,
}

/// The completion of a speculative evaluation, as captured by an
/// effect-capture frame.
#[derive(Debug, Clone)]
pub enum Completion {
    /// Normal completion; `None` is the Standard's *empty*.
    Normal(Option<Value>),
    Abrupt(AbruptCompletion),
    PossiblyNormal(Box<PossiblyNormal>),
}

impl AbruptCompletion {
    /// UpdateEmpty: fills an empty completion value with `value`.
    #[must_use]
    pub fn update_empty(self, value: Option<Value>) -> Self {
        match self {
            Self::Break { label, value: None } => Self::Break { label, value },
            Self::Continue { label, value: None } => Self::Continue { label, value },
            Self::Joined(joined) => Self::Joined(Box::new(JoinedAbrupt {
                condition: joined.condition,
                consequent: joined.consequent.update_empty(value),
                alternate: joined.alternate.update_empty(value),
            })),
            other => other,
        }
    }

    /// Whether this completion is a `Break` that the given loop consumes.
    pub fn is_break_for(&self, label: Option<StringId>) -> bool {
        match self {
            Self::Break { label: l, .. } => l.is_none() || *l == label,
            _ => false,
        }
    }

    /// Whether this completion is a `Continue` that the given loop consumes.
    pub fn is_continue_for(&self, label: Option<StringId>) -> bool {
        match self {
            Self::Continue { label: l, .. } => l.is_none() || *l == label,
            _ => false,
        }
    }

    /// The carried completion value, if any.
    pub fn value(&self) -> Option<Value> {
        match self {
            Self::Throw { value, .. } | Self::Return { value } => Some(*value),
            Self::Break { value, .. } | Self::Continue { value, .. } => *value,
            Self::Joined(_) => None,
        }
    }

    /// A coarse shape tag used when deciding whether two abrupt completions
    /// can be joined.
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Throw { .. } => "throw",
            Self::Break { .. } => "break",
            Self::Continue { .. } => "continue",
            Self::Return { .. } => "return",
            Self::Joined(_) => "joined",
        }
    }
}

/// Error half of [`EvalResult`].
#[derive(Debug, Clone)]
pub enum EvalError {
    /// The completion channel: model errors and control transfer in the
    /// interpreted program.
    Abrupt(AbruptCompletion),
    /// The exceptional channel: the engine itself must stop.
    Fatal(FatalError),
}

impl From<AbruptCompletion> for EvalError {
    fn from(completion: AbruptCompletion) -> Self {
        Self::Abrupt(completion)
    }
}

impl From<FatalError> for EvalError {
    fn from(fatal: FatalError) -> Self {
        Self::Fatal(fatal)
    }
}

/// Result alias used by every evaluator.
pub type EvalResult<T = Value> = Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_empty_fills_only_empty() {
        let filled = AbruptCompletion::Break {
            label: None,
            value: Some(Value::Number(1.0)),
        }
        .update_empty(Some(Value::Number(2.0)));
        match filled {
            AbruptCompletion::Break { value: Some(Value::Number(n)), .. } => assert_eq!(n, 1.0),
            other => panic!("unexpected completion {other:?}"),
        }

        let empty = AbruptCompletion::Continue { label: None, value: None }.update_empty(Some(Value::Number(2.0)));
        match empty {
            AbruptCompletion::Continue { value: Some(Value::Number(n)), .. } => assert_eq!(n, 2.0),
            other => panic!("unexpected completion {other:?}"),
        }
    }

    #[test]
    fn break_matching_honors_labels() {
        let unlabeled = AbruptCompletion::Break { label: None, value: None };
        assert!(unlabeled.is_break_for(None));
        assert!(unlabeled.is_break_for(Some(crate::intern::Interns::new().intern("outer"))));
    }
}
