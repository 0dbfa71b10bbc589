use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::{EngineError, Result};
use crate::remote::Query;

/// Per-document binary operators understood by the remote stack machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Integer division, evaluated per document.
    Div,
    /// Remainder.
    Mod,
    /// `1` when the left value is smaller, else `0`.
    Less,
    /// `1` when the left value is smaller or equal, else `0`.
    LessEq,
    /// `1` when both values are equal, else `0`.
    Equal,
    /// `1` when the values differ, else `0`.
    NotEqual,
    /// `1` when the left value is greater, else `0`.
    Greater,
    /// `1` when the left value is greater or equal, else `0`.
    GreaterEq,
    /// Smaller of the two values.
    Min,
    /// Larger of the two values.
    Max,
}

impl BinOp {
    /// Token pushed after each operand but the first.
    pub fn token(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Less => "<",
            BinOp::LessEq => "<=",
            BinOp::Equal => "=",
            BinOp::NotEqual => "!=",
            BinOp::Greater => ">",
            BinOp::GreaterEq => ">=",
            BinOp::Min => "min()",
            BinOp::Max => "max()",
        }
    }

    /// Applies the operator to two values the way the remote does.
    ///
    /// Division and remainder by zero yield `0`.
    pub fn apply(self, left: i64, right: i64) -> i64 {
        match self {
            BinOp::Add => left.wrapping_add(right),
            BinOp::Sub => left.wrapping_sub(right),
            BinOp::Mul => left.wrapping_mul(right),
            BinOp::Div => left.checked_div(right).unwrap_or(0),
            BinOp::Mod => left.checked_rem(right).unwrap_or(0),
            BinOp::Less => i64::from(left < right),
            BinOp::LessEq => i64::from(left <= right),
            BinOp::Equal => i64::from(left == right),
            BinOp::NotEqual => i64::from(left != right),
            BinOp::Greater => i64::from(left > right),
            BinOp::GreaterEq => i64::from(left >= right),
            BinOp::Min => left.min(right),
            BinOp::Max => left.max(right),
        }
    }

    /// Parses a token produced by [`BinOp::token`].
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "%" => BinOp::Mod,
            "<" => BinOp::Less,
            "<=" => BinOp::LessEq,
            "=" => BinOp::Equal,
            "!=" => BinOp::NotEqual,
            ">" => BinOp::Greater,
            ">=" => BinOp::GreaterEq,
            "min()" => BinOp::Min,
            "max()" => BinOp::Max,
            _ => return None,
        })
    }
}

/// Operators combined on the host after both sides were fetched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregateOp {
    /// Floating point division of the aggregated values.
    Div,
}

impl AggregateOp {
    fn symbol(self) -> &'static str {
        match self {
            AggregateOp::Div => "/",
        }
    }
}

/// Per-document computation pushed onto the remote stat stack.
///
/// Trees can be built from the variants directly, but the associated
/// constructors reject aggregate operands up front. [`StatExpr::validate`]
/// re-checks a tree before it is pushed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatExpr {
    /// Value of an integer field.
    IntField(String),
    /// Literal value.
    Constant(i64),
    /// `1` for every document.
    Count,
    /// Left fold of `op` over one or more operands.
    BinOp {
        /// Operator.
        op: BinOp,
        /// Operands, folded left to right.
        operands: Vec<StatExpr>,
    },
    /// Scaled exponential.
    Exp {
        /// Operand.
        stat: Box<StatExpr>,
        /// Scale factor.
        scale: i32,
    },
    /// Scaled natural logarithm.
    Log {
        /// Operand.
        stat: Box<StatExpr>,
        /// Scale factor.
        scale: i32,
    },
    /// Absolute value.
    Abs(Box<StatExpr>),
    /// Operand cached on the remote side.
    Cached(Box<StatExpr>),
    /// Float field scaled to an integer as `value * mult + add`.
    FloatScale {
        /// Field holding float strings.
        field: String,
        /// Multiplier.
        mult: i64,
        /// Offset.
        add: i64,
    },
    /// `(left * right) >> shift`.
    MultiplyShiftRight {
        /// Shift amount.
        shift: u32,
        /// Left operand.
        left: Box<StatExpr>,
        /// Right operand.
        right: Box<StatExpr>,
    },
    /// `(left << shift) / right`.
    ShiftLeftDivide {
        /// Shift amount.
        shift: u32,
        /// Left operand.
        left: Box<StatExpr>,
        /// Right operand.
        right: Box<StatExpr>,
    },
    /// `1` when the document has `value` in `field`.
    HasInt {
        /// Integer field.
        field: String,
        /// Term to look for.
        value: i64,
    },
    /// `1` when the document has `value` in `field`.
    HasString {
        /// String field.
        field: String,
        /// Term to look for.
        value: String,
    },
    /// `1` when the document has any value in the integer field.
    HasIntField(String),
    /// `1` when the document has any value in the string field.
    HasStringField(String),
    /// `1` when the document matches the predicate.
    Query(Query),
    /// Two independently pushed values combined on the host.
    AggregateBinOp {
        /// Host-side operator.
        op: AggregateOp,
        /// Left operand, pushed first.
        left: Box<StatExpr>,
        /// Right operand, pushed second.
        right: Box<StatExpr>,
    },
    /// One pushed value combined on the host with a literal.
    AggregateBinOpConst {
        /// Host-side operator.
        op: AggregateOp,
        /// Operand.
        stat: Box<StatExpr>,
        /// Literal right-hand side.
        value: i64,
    },
}

impl StatExpr {
    /// Integer field value.
    pub fn int_field(name: impl Into<String>) -> Self {
        StatExpr::IntField(name.into())
    }

    /// Literal value.
    pub fn constant(value: i64) -> Self {
        StatExpr::Constant(value)
    }

    /// Document count.
    pub fn count() -> Self {
        StatExpr::Count
    }

    /// Folds `op` over `operands`.
    pub fn bin_op(op: BinOp, operands: impl IntoIterator<Item = StatExpr>) -> Result<Self> {
        let operands: Vec<StatExpr> = operands.into_iter().collect();
        if operands.is_empty() {
            return Err(EngineError::invalid(format!(
                "operator {} needs at least one operand",
                op.token()
            )));
        }
        for operand in &operands {
            reject_aggregate(operand)?;
        }
        Ok(StatExpr::BinOp { op, operands })
    }

    /// `a + b + ...`
    pub fn add(operands: impl IntoIterator<Item = StatExpr>) -> Result<Self> {
        Self::bin_op(BinOp::Add, operands)
    }

    /// `a - b - ...`
    pub fn sub(operands: impl IntoIterator<Item = StatExpr>) -> Result<Self> {
        Self::bin_op(BinOp::Sub, operands)
    }

    /// `a * b * ...`
    pub fn mul(operands: impl IntoIterator<Item = StatExpr>) -> Result<Self> {
        Self::bin_op(BinOp::Mul, operands)
    }

    /// Per-document integer division.
    pub fn div(operands: impl IntoIterator<Item = StatExpr>) -> Result<Self> {
        Self::bin_op(BinOp::Div, operands)
    }

    /// Per-document remainder.
    pub fn modulo(operands: impl IntoIterator<Item = StatExpr>) -> Result<Self> {
        Self::bin_op(BinOp::Mod, operands)
    }

    /// `a < b`
    pub fn less(operands: impl IntoIterator<Item = StatExpr>) -> Result<Self> {
        Self::bin_op(BinOp::Less, operands)
    }

    /// `a <= b`
    pub fn less_eq(operands: impl IntoIterator<Item = StatExpr>) -> Result<Self> {
        Self::bin_op(BinOp::LessEq, operands)
    }

    /// `a = b`; an integer field compared with a literal becomes [`StatExpr::HasInt`].
    pub fn is_equal(operands: impl IntoIterator<Item = StatExpr>) -> Result<Self> {
        let operands: Vec<StatExpr> = operands.into_iter().collect();
        if let [StatExpr::IntField(field), StatExpr::Constant(value)] = operands.as_slice() {
            return Ok(StatExpr::has_int(field.clone(), *value));
        }
        Self::bin_op(BinOp::Equal, operands)
    }

    /// `a != b`
    pub fn not_equal(operands: impl IntoIterator<Item = StatExpr>) -> Result<Self> {
        Self::bin_op(BinOp::NotEqual, operands)
    }

    /// `a > b`
    pub fn greater(operands: impl IntoIterator<Item = StatExpr>) -> Result<Self> {
        Self::bin_op(BinOp::Greater, operands)
    }

    /// `a >= b`
    pub fn greater_eq(operands: impl IntoIterator<Item = StatExpr>) -> Result<Self> {
        Self::bin_op(BinOp::GreaterEq, operands)
    }

    /// Smallest operand.
    pub fn min(operands: impl IntoIterator<Item = StatExpr>) -> Result<Self> {
        Self::bin_op(BinOp::Min, operands)
    }

    /// Largest operand.
    pub fn max(operands: impl IntoIterator<Item = StatExpr>) -> Result<Self> {
        Self::bin_op(BinOp::Max, operands)
    }

    /// Scaled exponential of `stat`.
    pub fn exp(stat: StatExpr, scale: i32) -> Result<Self> {
        reject_aggregate(&stat)?;
        Ok(StatExpr::Exp {
            stat: Box::new(stat),
            scale,
        })
    }

    /// Scaled logarithm of `stat`.
    pub fn log(stat: StatExpr, scale: i32) -> Result<Self> {
        reject_aggregate(&stat)?;
        Ok(StatExpr::Log {
            stat: Box::new(stat),
            scale,
        })
    }

    /// Absolute value of `stat`.
    pub fn abs(stat: StatExpr) -> Result<Self> {
        reject_aggregate(&stat)?;
        Ok(StatExpr::Abs(Box::new(stat)))
    }

    /// Remote-cached `stat`.
    pub fn cached(stat: StatExpr) -> Result<Self> {
        reject_aggregate(&stat)?;
        Ok(StatExpr::Cached(Box::new(stat)))
    }

    /// Float field scaled to an integer.
    pub fn float_scale(field: impl Into<String>, mult: i64, add: i64) -> Self {
        StatExpr::FloatScale {
            field: field.into(),
            mult,
            add,
        }
    }

    /// `(left * right) >> shift`.
    pub fn multiply_shift_right(shift: u32, left: StatExpr, right: StatExpr) -> Result<Self> {
        reject_aggregate(&left)?;
        reject_aggregate(&right)?;
        Ok(StatExpr::MultiplyShiftRight {
            shift,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// `(left << shift) / right`.
    pub fn shift_left_divide(shift: u32, left: StatExpr, right: StatExpr) -> Result<Self> {
        reject_aggregate(&left)?;
        reject_aggregate(&right)?;
        Ok(StatExpr::ShiftLeftDivide {
            shift,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// Presence of an integer term.
    pub fn has_int(field: impl Into<String>, value: i64) -> Self {
        StatExpr::HasInt {
            field: field.into(),
            value,
        }
    }

    /// Presence of a string term.
    pub fn has_string(field: impl Into<String>, value: impl Into<String>) -> Self {
        StatExpr::HasString {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Presence of any integer term.
    pub fn has_int_field(field: impl Into<String>) -> Self {
        StatExpr::HasIntField(field.into())
    }

    /// Presence of any string term.
    pub fn has_string_field(field: impl Into<String>) -> Self {
        StatExpr::HasStringField(field.into())
    }

    /// Predicate match indicator.
    pub fn query(query: Query) -> Self {
        StatExpr::Query(query)
    }

    /// Host-side division of two aggregated stats.
    pub fn agg_div(left: StatExpr, right: StatExpr) -> Result<Self> {
        reject_aggregate(&left)?;
        reject_aggregate(&right)?;
        Ok(StatExpr::AggregateBinOp {
            op: AggregateOp::Div,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// Host-side division of an aggregated stat by a literal.
    pub fn agg_div_const(stat: StatExpr, value: i64) -> Result<Self> {
        reject_aggregate(&stat)?;
        if value == 0 {
            return Err(EngineError::DivideByZero);
        }
        Ok(StatExpr::AggregateBinOpConst {
            op: AggregateOp::Div,
            stat: Box::new(stat),
            value,
        })
    }

    /// Whether the value of this expression only exists host-side.
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            StatExpr::AggregateBinOp { .. } | StatExpr::AggregateBinOpConst { .. }
        )
    }

    /// Number of remote stack slots a push of this expression occupies.
    pub fn slots(&self) -> usize {
        match self {
            StatExpr::AggregateBinOp { .. } => 2,
            _ => 1,
        }
    }

    /// Checks a tree built from raw variants.
    ///
    /// Aggregates may only appear at the root, every operator needs operands,
    /// and literal divisors must be non-zero.
    pub fn validate(&self) -> Result<()> {
        match self {
            StatExpr::AggregateBinOp { left, right, .. } => {
                reject_aggregate(left)?;
                reject_aggregate(right)?;
                left.validate_operand()?;
                right.validate_operand()
            }
            StatExpr::AggregateBinOpConst { stat, value, .. } => {
                reject_aggregate(stat)?;
                if *value == 0 {
                    return Err(EngineError::DivideByZero);
                }
                stat.validate_operand()
            }
            other => other.validate_operand(),
        }
    }

    fn validate_operand(&self) -> Result<()> {
        match self {
            StatExpr::AggregateBinOp { .. } | StatExpr::AggregateBinOpConst { .. } => {
                Err(EngineError::AggregateComposition)
            }
            StatExpr::BinOp { op, operands } => {
                if operands.is_empty() {
                    return Err(EngineError::invalid(format!(
                        "operator {} needs at least one operand",
                        op.token()
                    )));
                }
                operands.iter().try_for_each(StatExpr::validate_operand)
            }
            StatExpr::Exp { stat, .. }
            | StatExpr::Log { stat, .. }
            | StatExpr::Abs(stat)
            | StatExpr::Cached(stat) => stat.validate_operand(),
            StatExpr::MultiplyShiftRight { left, right, .. }
            | StatExpr::ShiftLeftDivide { left, right, .. } => {
                left.validate_operand()?;
                right.validate_operand()
            }
            _ => Ok(()),
        }
    }

    /// Compiles the expression into postfix tokens for the remote stack machine.
    ///
    /// Fails only when an embedded predicate cannot be encoded.
    pub fn pushes(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        self.emit(&mut out)?;
        Ok(out)
    }

    fn emit(&self, out: &mut Vec<String>) -> Result<()> {
        match self {
            StatExpr::IntField(name) => out.push(name.clone()),
            StatExpr::Constant(value) => out.push(value.to_string()),
            StatExpr::Count => out.push("count()".to_owned()),
            StatExpr::BinOp { op, operands } => {
                for (idx, operand) in operands.iter().enumerate() {
                    operand.emit(out)?;
                    if idx > 0 {
                        out.push(op.token().to_owned());
                    }
                }
            }
            StatExpr::Exp { stat, scale } => {
                stat.emit(out)?;
                out.push(format!("exp {scale}"));
            }
            StatExpr::Log { stat, scale } => {
                stat.emit(out)?;
                out.push(format!("log {scale}"));
            }
            StatExpr::Abs(stat) => {
                stat.emit(out)?;
                out.push("abs()".to_owned());
            }
            StatExpr::Cached(stat) => {
                stat.emit(out)?;
                out.push("cached()".to_owned());
            }
            StatExpr::FloatScale { field, mult, add } => {
                out.push(format!("floatscale {field} * {mult} + {add}"));
            }
            StatExpr::MultiplyShiftRight { shift, left, right } => {
                left.emit(out)?;
                right.emit(out)?;
                out.push(format!("mulshr {shift}"));
            }
            StatExpr::ShiftLeftDivide { shift, left, right } => {
                left.emit(out)?;
                right.emit(out)?;
                out.push(format!("shldiv {shift}"));
            }
            StatExpr::HasInt { field, value } => out.push(format!("hasint {field}:{value}")),
            StatExpr::HasString { field, value } => out.push(format!("hasstr {field}:{value}")),
            StatExpr::HasIntField(field) => out.push(format!("hasintfield {field}")),
            StatExpr::HasStringField(field) => out.push(format!("hasstrfield {field}")),
            StatExpr::Query(query) => out.push(format!("lucene {}", encode_query(query)?)),
            StatExpr::AggregateBinOp { left, right, .. } => {
                left.emit(out)?;
                right.emit(out)?;
            }
            StatExpr::AggregateBinOpConst { stat, .. } => stat.emit(out)?,
        }
        Ok(())
    }
}

fn reject_aggregate(stat: &StatExpr) -> Result<()> {
    if stat.is_aggregate() {
        Err(EngineError::AggregateComposition)
    } else {
        Ok(())
    }
}

/// Encodes a predicate as carried by a `lucene` token: base64 of its JSON form.
pub fn encode_query(query: &Query) -> Result<String> {
    let json = serde_json::to_vec(query)
        .map_err(|err| EngineError::invalid(format!("unencodable query {query}: {err}")))?;
    Ok(STANDARD.encode(json))
}

/// Decodes the payload of a `lucene` token.
pub fn decode_query(encoded: &str) -> Result<Query> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|err| EngineError::invalid(format!("malformed query token: {err}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| EngineError::invalid(format!("malformed query token: {err}")))
}

impl fmt::Display for StatExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatExpr::IntField(name) => write!(f, "int:{name}"),
            StatExpr::Constant(value) => write!(f, "{value}"),
            StatExpr::Count => f.write_str("count()"),
            StatExpr::BinOp {
                op: op @ (BinOp::Min | BinOp::Max),
                operands,
            } => {
                let name = if *op == BinOp::Min { "min" } else { "max" };
                write!(f, "{name}(")?;
                for (idx, operand) in operands.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{operand}")?;
                }
                f.write_str(")")
            }
            StatExpr::BinOp { op, operands } => {
                f.write_str("(")?;
                for (idx, operand) in operands.iter().enumerate() {
                    if idx > 0 {
                        write!(f, " {} ", op.token())?;
                    }
                    write!(f, "{operand}")?;
                }
                f.write_str(")")
            }
            StatExpr::Exp { stat, scale } => write!(f, "exp({stat}, {scale})"),
            StatExpr::Log { stat, scale } => write!(f, "log({stat}, {scale})"),
            StatExpr::Abs(stat) => write!(f, "abs({stat})"),
            StatExpr::Cached(stat) => write!(f, "cached({stat})"),
            StatExpr::FloatScale { field, mult, add } => {
                write!(f, "floatscale({field} * {mult} + {add})")
            }
            StatExpr::MultiplyShiftRight { shift, left, right } => {
                write!(f, "mulshr({shift}, {left}, {right})")
            }
            StatExpr::ShiftLeftDivide { shift, left, right } => {
                write!(f, "shldiv({shift}, {left}, {right})")
            }
            StatExpr::HasInt { field, value } => write!(f, "hasint:{field}:{value}"),
            StatExpr::HasString { field, value } => write!(f, "hasstr:{field}:{value}"),
            StatExpr::HasIntField(field) => write!(f, "hasintfield:{field}"),
            StatExpr::HasStringField(field) => write!(f, "hasstrfield:{field}"),
            StatExpr::Query(query) => write!(f, "lucene({query})"),
            StatExpr::AggregateBinOp { op, left, right } => {
                write!(f, "({left}) {} ({right})", op.symbol())
            }
            StatExpr::AggregateBinOpConst { op, stat, value } => {
                write!(f, "({stat}) {} {value}", op.symbol())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> StatExpr {
        StatExpr::int_field(name)
    }

    #[test]
    fn binop_emits_operator_after_each_operand_but_first() -> Result<()> {
        let expr = StatExpr::add([field("a"), field("b"), StatExpr::constant(3)])?;
        assert_eq!(expr.pushes()?, vec!["a", "b", "+", "3", "+"]);
        assert_eq!(expr.to_string(), "(int:a + int:b + 3)");
        Ok(())
    }

    #[test]
    fn nested_expression_compiles_postfix() -> Result<()> {
        let inner = StatExpr::mul([field("clicks"), StatExpr::constant(100)])?;
        let expr = StatExpr::abs(StatExpr::log(StatExpr::sub([inner, StatExpr::count()])?, 1)?)?;
        assert_eq!(
            expr.pushes()?,
            vec!["clicks", "100", "*", "count()", "-", "log 1", "abs()"]
        );
        Ok(())
    }

    #[test]
    fn leaf_tokens_match_remote_spelling() -> Result<()> {
        assert_eq!(StatExpr::has_int("f", -4).pushes()?, vec!["hasint f:-4"]);
        assert_eq!(StatExpr::has_string("f", "x y").pushes()?, vec!["hasstr f:x y"]);
        assert_eq!(StatExpr::has_int_field("f").pushes()?, vec!["hasintfield f"]);
        assert_eq!(StatExpr::has_string_field("f").pushes()?, vec!["hasstrfield f"]);
        assert_eq!(
            StatExpr::float_scale("price", 100, 5).pushes()?,
            vec!["floatscale price * 100 + 5"]
        );
        Ok(())
    }

    #[test]
    fn shift_ops_push_both_operands_then_token() -> Result<()> {
        let expr = StatExpr::multiply_shift_right(8, field("a"), field("b"))?;
        assert_eq!(expr.pushes()?, vec!["a", "b", "mulshr 8"]);
        let expr = StatExpr::shift_left_divide(4, field("a"), field("b"))?;
        assert_eq!(expr.pushes()?, vec!["a", "b", "shldiv 4"]);
        Ok(())
    }

    #[test]
    fn equality_of_field_and_constant_becomes_hasint() -> Result<()> {
        let expr = StatExpr::is_equal([field("country"), StatExpr::constant(5)])?;
        assert_eq!(expr, StatExpr::has_int("country", 5));
        let expr = StatExpr::is_equal([StatExpr::constant(5), field("country")])?;
        assert_eq!(expr.pushes()?, vec!["5", "country", "="]);
        Ok(())
    }

    #[test]
    fn aggregates_cannot_be_composed() -> Result<()> {
        let ratio = StatExpr::agg_div(field("clicks"), field("impressions"))?;
        assert_eq!(ratio.pushes()?, vec!["clicks", "impressions"]);
        assert!(matches!(
            StatExpr::add([ratio.clone(), StatExpr::count()]),
            Err(EngineError::AggregateComposition)
        ));
        assert!(matches!(
            StatExpr::abs(ratio.clone()),
            Err(EngineError::AggregateComposition)
        ));
        let raw = StatExpr::BinOp {
            op: BinOp::Add,
            operands: vec![ratio],
        };
        assert!(matches!(raw.validate(), Err(EngineError::AggregateComposition)));
        Ok(())
    }

    #[test]
    fn aggregate_const_division_checks_zero() -> Result<()> {
        assert!(matches!(
            StatExpr::agg_div_const(field("a"), 0),
            Err(EngineError::DivideByZero)
        ));
        let expr = StatExpr::agg_div_const(field("a"), 10)?;
        assert_eq!(expr.pushes()?, vec!["a"]);
        assert_eq!(expr.to_string(), "(int:a) / 10");
        assert_eq!(expr.slots(), 1);
        Ok(())
    }

    #[test]
    fn empty_operand_list_is_rejected() {
        assert!(matches!(
            StatExpr::add(Vec::new()),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    fn query_payload(query: &Query) -> Result<Query> {
        let tokens = StatExpr::query(query.clone()).pushes()?;
        assert_eq!(tokens.len(), 1);
        let payload = tokens[0].strip_prefix("lucene ").expect("lucene prefix");
        decode_query(payload)
    }

    #[test]
    fn query_token_decodes_back() -> Result<()> {
        let query = Query::term("country", "us");
        assert_eq!(query_payload(&query)?, query);
        Ok(())
    }

    #[test]
    fn compound_query_tokens_decode_back() -> Result<()> {
        let and = Query::And(vec![Query::term("country", "us"), Query::term("clicks", 3)]);
        let or = Query::Or(vec![and.clone(), Query::term("country", "fr")]);
        let not = Query::negate(or.clone());
        for query in [and, or, not] {
            let tokens = StatExpr::query(query.clone()).pushes()?;
            assert_ne!(tokens[0], "lucene ");
            assert_eq!(query_payload(&query)?, query);
        }
        Ok(())
    }
}
