use crate::environment::Transition;
use crate::expression::{EntityRef, Expression, NAME, PACKAGE, PRODUCT, Value};

/// One operand of a `requires`/`prefers`/`conflicts` declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// Matches packages by product name.
    Name(String),
    /// Matches exactly one package.
    Package(EntityRef),
    /// Matches every package of a product.
    Product(EntityRef),
    Expression(Expression),
    Const(Value),
}

impl Term {
    fn into_expression(self) -> Expression {
        match self {
            Term::Name(name) => NAME.equals(name),
            Term::Package(package) => PACKAGE.equals(Value::Package(package)),
            Term::Product(product) => PRODUCT.equals(Value::Product(product)),
            Term::Expression(expression) => expression,
            Term::Const(value) => Expression::Const(value),
        }
    }
}

impl From<&str> for Term {
    fn from(name: &str) -> Self {
        Term::Name(name.to_string())
    }
}

impl From<Expression> for Term {
    fn from(expression: Expression) -> Self {
        Term::Expression(expression)
    }
}

/// Conjunction of all terms; `None` for an empty declaration.
fn conjunction(terms: impl IntoIterator<Item = Term>) -> Option<Expression> {
    terms
        .into_iter()
        .map(Term::into_expression)
        .reduce(|acc, expression| acc & expression)
}

/// Constraint lists and transitions owned by a product or a package.
#[derive(Debug, Clone, Default)]
pub struct Rules {
    pub requirements: Vec<Expression>,
    pub preferences: Vec<Expression>,
    pub conflicts: Vec<Expression>,
    pub transitions: Vec<Transition>,
}

impl Rules {
    pub fn requires(&mut self, terms: impl IntoIterator<Item = Term>) {
        self.requirements.extend(conjunction(terms));
    }

    pub fn prefers(&mut self, terms: impl IntoIterator<Item = Term>) {
        self.preferences.extend(conjunction(terms));
    }

    pub fn conflicts(&mut self, terms: impl IntoIterator<Item = Term>) {
        self.conflicts.extend(conjunction(terms));
    }

    pub fn add_transition(&mut self, transition: Transition) {
        self.transitions.push(transition);
    }
}
