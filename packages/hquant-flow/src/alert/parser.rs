use pest::iterators::Pair;
use pest::Parser as PestParser;
use pest_derive::Parser;

use super::expr::{ArithOp, CmpOp, Expr, Func};

#[derive(Parser)]
#[grammar = "alert/condition.pest"]
struct ConditionParser;

pub(super) fn parse_expr(src: &str) -> Result<Expr, String> {
    let mut pairs = ConditionParser::parse(Rule::condition, src).map_err(|e| e.to_string())?;
    let pair = pairs.next().ok_or_else(|| "empty condition".to_string())?;
    let expr_pair = first_inner(pair)?;
    build_expr(expr_pair)
}

fn first_inner(pair: Pair<'_, Rule>) -> Result<Pair<'_, Rule>, String> {
    let rule = pair.as_rule();
    pair.into_inner()
        .next()
        .ok_or_else(|| format!("empty {rule:?}"))
}

fn build_expr(pair: Pair<'_, Rule>) -> Result<Expr, String> {
    match pair.as_rule() {
        Rule::expr => build_expr(first_inner(pair)?),
        Rule::or_expr => fold_logic(pair, Rule::or_op, |l, r| Expr::Or(Box::new(l), Box::new(r))),
        Rule::and_expr => fold_logic(pair, Rule::and_op, |l, r| Expr::And(Box::new(l), Box::new(r))),
        Rule::unary_expr => build_prefixed(pair, Rule::not_op, |e| Expr::Not(Box::new(e))),
        Rule::comparison => build_comparison(pair),
        Rule::sum | Rule::product => fold_arith(pair),
        Rule::signed => build_prefixed(pair, Rule::neg_op, |e| Expr::Neg(Box::new(e))),
        Rule::number => pair
            .as_str()
            .parse()
            .map(Expr::Number)
            .map_err(|_| format!("invalid number: {}", pair.as_str())),
        Rule::string => Ok(Expr::Text(first_inner(pair)?.as_str().to_string())),
        Rule::boolean => Ok(Expr::Bool(pair.as_str().eq_ignore_ascii_case("true"))),
        Rule::ident => Ok(Expr::Field(pair.as_str().to_string())),
        Rule::call => build_call(pair),
        _ => Err(format!("unexpected rule: {:?}", pair.as_rule())),
    }
}

fn fold_logic(
    pair: Pair<'_, Rule>,
    op_rule: Rule,
    mk: fn(Expr, Expr) -> Expr,
) -> Result<Expr, String> {
    let mut inner = pair.into_inner();
    let first = inner.next().ok_or_else(|| "missing lhs".to_string())?;
    let mut left = build_expr(first)?;
    while let Some(op) = inner.next() {
        if op.as_rule() != op_rule {
            return Err(format!("unexpected operator rule: {:?}", op.as_rule()));
        }
        let rhs = inner.next().ok_or_else(|| "missing rhs".to_string())?;
        left = mk(left, build_expr(rhs)?);
    }
    Ok(left)
}

fn fold_arith(pair: Pair<'_, Rule>) -> Result<Expr, String> {
    let mut inner = pair.into_inner();
    let first = inner.next().ok_or_else(|| "missing operand".to_string())?;
    let mut left = build_expr(first)?;
    while let Some(op_pair) = inner.next() {
        let op = match op_pair.as_str() {
            "+" => ArithOp::Add,
            "-" => ArithOp::Sub,
            "*" => ArithOp::Mul,
            "/" => ArithOp::Div,
            "%" => ArithOp::Rem,
            other => return Err(format!("unknown arithmetic operator: {other}")),
        };
        let rhs = inner.next().ok_or_else(|| "missing operand".to_string())?;
        left = Expr::Arith {
            op,
            lhs: Box::new(left),
            rhs: Box::new(build_expr(rhs)?),
        };
    }
    Ok(left)
}

/// Repeated prefix operators collapse to one or two applications by parity.
/// Two are kept for an even run so `not not x` still coerces to a boolean.
fn build_prefixed(
    pair: Pair<'_, Rule>,
    prefix: Rule,
    mk: fn(Expr) -> Expr,
) -> Result<Expr, String> {
    let mut inner = pair.into_inner().peekable();
    let mut count = 0usize;
    while inner.peek().map(|p| p.as_rule()) == Some(prefix) {
        inner.next();
        count += 1;
    }
    let operand = inner.next().ok_or_else(|| "missing operand".to_string())?;
    let mut out = build_expr(operand)?;
    let applied = match count {
        0 => 0,
        n if n % 2 == 1 => 1,
        _ => 2,
    };
    for _ in 0..applied {
        out = mk(out);
    }
    Ok(out)
}

fn build_comparison(pair: Pair<'_, Rule>) -> Result<Expr, String> {
    let mut inner = pair.into_inner();
    let lhs_pair = inner.next().ok_or_else(|| "missing lhs".to_string())?;
    let lhs = build_expr(lhs_pair)?;
    let Some(op_pair) = inner.next() else {
        return Ok(lhs);
    };
    let op = match op_pair.as_str() {
        "<" => CmpOp::Lt,
        "<=" => CmpOp::Le,
        ">" => CmpOp::Gt,
        ">=" => CmpOp::Ge,
        "==" => CmpOp::Eq,
        "!=" => CmpOp::Ne,
        other => return Err(format!("unknown comparison operator: {other}")),
    };
    let rhs_pair = inner.next().ok_or_else(|| "missing rhs".to_string())?;
    Ok(Expr::Cmp {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(build_expr(rhs_pair)?),
    })
}

fn build_call(pair: Pair<'_, Rule>) -> Result<Expr, String> {
    let mut inner = pair.into_inner();
    let name = inner
        .next()
        .ok_or_else(|| "missing function name".to_string())?
        .as_str()
        .to_string();
    let func = Func::from_name(&name).ok_or_else(|| format!("unknown function: {name}"))?;
    let args = inner.map(build_expr).collect::<Result<Vec<_>, _>>()?;
    let (min, max) = func.arity();
    if args.len() < min || args.len() > max {
        return Err(format!("{name}: got {} arguments", args.len()));
    }
    Ok(Expr::Call { func, args })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> Box<Expr> {
        Box::new(Expr::Field(name.to_string()))
    }

    #[test]
    fn and_binds_tighter_than_or() {
        match parse_expr("a > 1 or b > 2 and c > 3").unwrap() {
            Expr::Or(_, rhs) => assert!(matches!(*rhs, Expr::And(_, _))),
            other => panic!("expected or at the root: {other:?}"),
        }
    }

    #[test]
    fn negative_literal_and_double_not() {
        assert_eq!(
            parse_expr("zscore < -2").unwrap(),
            Expr::Cmp {
                op: CmpOp::Lt,
                lhs: field("zscore"),
                rhs: Box::new(Expr::Neg(Box::new(Expr::Number(2.0)))),
            }
        );
        let double_not = Expr::Not(Box::new(Expr::Not(field("flag"))));
        assert_eq!(parse_expr("not not flag").unwrap(), double_not);
        assert_eq!(parse_expr("not not not not flag").unwrap(), double_not);
        assert_eq!(parse_expr("not not not flag").unwrap(), Expr::Not(field("flag")));
    }

    #[test]
    fn keywords_need_word_boundaries() {
        assert_eq!(
            parse_expr("order > 1").unwrap(),
            Expr::Cmp {
                op: CmpOp::Gt,
                lhs: field("order"),
                rhs: Box::new(Expr::Number(1.0)),
            }
        );
        assert_eq!(parse_expr("notional").unwrap(), Expr::Field("notional".into()));
        assert_eq!(parse_expr("True").unwrap(), Expr::Bool(true));
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in ["", "zscore >", "a > 1 > 2", "foo(1)", "abs(1, 2)", "a and", "(a > 1", "'open"] {
            assert!(parse_expr(bad).is_err(), "{bad:?} should not parse");
        }
    }
}
