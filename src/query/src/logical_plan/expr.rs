use common::scalar::ScalarValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowFunction {
    Min,
    Max,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowFrame {
    /// UNBOUNDED PRECEDING up to and including the current row.
    CumulativeToCurrent,
    /// Exactly the row n positions before the current one.
    OffsetPreceding(usize),
    /// The whole partition, regardless of ordering.
    WholePartition,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AggregateFunction {
    Min,
    Max,
    Avg,
    CountIf,
    GroupArrayIf { limit: usize, distinct: bool },
}

/// Scalar, window and aggregate expressions used inside stage columns.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Column(String),
    Literal(ScalarValue),
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// Whole seconds between two epoch-millisecond timestamps.
    SecondsBetween { from: Box<Expr>, to: Box<Expr> },
    /// Ascending sort of the listed values, nulls last.
    ArraySort(Vec<Expr>),
    /// 1-based element access, null when out of bounds.
    ArrayAt { array: Box<Expr>, index: usize },
    WindowAgg {
        fun: WindowFunction,
        arg: Box<Expr>,
        partition_by: Vec<Expr>,
        /// Descending ordering key. None leaves the partition unordered.
        order_desc_by: Option<Box<Expr>>,
        frame: WindowFrame,
    },
    Aggregate {
        fun: AggregateFunction,
        arg: Option<Box<Expr>>,
        predicate: Option<Box<Expr>>,
    },
}

pub fn col(name: impl Into<String>) -> Expr {
    Expr::Column(name.into())
}

pub fn lit(value: impl Into<ScalarValue>) -> Expr {
    Expr::Literal(value.into())
}

pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
    Expr::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

pub fn and(left: Expr, right: Expr) -> Expr {
    binary(left, BinaryOp::And, right)
}

pub fn or(left: Expr, right: Expr) -> Expr {
    binary(left, BinaryOp::Or, right)
}

pub fn multi_and(exprs: Vec<Expr>) -> Expr {
    let mut expr = exprs[0].clone();
    for right in exprs.iter().skip(1) {
        expr = and(expr, right.clone());
    }

    expr
}

pub fn multi_or(exprs: Vec<Expr>) -> Expr {
    let mut expr = exprs[0].clone();
    for right in exprs.iter().skip(1) {
        expr = or(expr, right.clone());
    }

    expr
}
