//! Built-in derivation rule families
//!
//! The small operator set the engine and its consumers need out of the
//! box: arithmetic, date arithmetic with sentinel propagation, a
//! reproducible pseudo-random value, table aggregates over a sub-record
//! scope, and sparse block producers/consumers. Fuller rule libraries
//! register their own families through [`crate::registry`].

use std::rc::Rc;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tabula_types::{Continuous, Date, Symbol, ValueKind, VarKeyKind};

use crate::block::ContinuousValueBlock;
use crate::compile::CompiledRule;
use crate::error::{Error, Result};
use crate::eval::{EvalContext, RuleBody};
use crate::registry;
use crate::rule::{DerivationRule, Operand, RuleType};

/// Registers every built-in family. Idempotent; calling twice is a no-op.
pub fn register_builtin_rules() -> Result<()> {
    for rule in builtin_prototypes() {
        match registry::register(rule) {
            Ok(()) | Err(Error::DuplicateRule(_)) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn builtin_prototypes() -> Vec<DerivationRule> {
    let continuous = || RuleType::simple(ValueKind::Continuous);
    let c_op = || Operand::typed(ValueKind::Continuous);
    let date_op = || Operand::typed(ValueKind::Date);
    let table_op = || Operand::typed(ValueKind::ObjectArray);
    let block_op = || Operand::typed(ValueKind::ContinuousBlock);

    let mut copy_block = DerivationRule::new(
        "CopyBlock",
        RuleType::simple(ValueKind::ContinuousBlock),
        Arc::new(CopyBlockBody),
    )
    .with_operand(block_op());
    copy_block.var_key_kind = VarKeyKind::Symbol;

    vec![
        DerivationRule::new("CopyC", continuous(), Arc::new(CopyBody)).with_operand(c_op()),
        DerivationRule::new("Sum", continuous(), Arc::new(SumBody))
            .variable()
            .with_operand(c_op())
            .with_operand(c_op()),
        DerivationRule::new("Diff", continuous(), Arc::new(DiffBody))
            .with_operand(c_op())
            .with_operand(c_op()),
        DerivationRule::new("Product", continuous(), Arc::new(ProductBody))
            .with_operand(c_op())
            .with_operand(c_op()),
        DerivationRule::new("Random", continuous(), Arc::new(RandomBody)),
        DerivationRule::new("AbsoluteDay", continuous(), Arc::new(AbsoluteDayBody))
            .with_operand(date_op()),
        DerivationRule::new(
            "AddDays",
            RuleType::simple(ValueKind::Date),
            Arc::new(AddDaysBody),
        )
        .with_operand(date_op())
        .with_operand(c_op()),
        DerivationRule::new("DiffDays", continuous(), Arc::new(DiffDaysBody))
            .with_operand(date_op())
            .with_operand(date_op()),
        DerivationRule::new("IsDateValid", continuous(), Arc::new(IsDateValidBody))
            .with_operand(date_op()),
        DerivationRule::new("TableSum", continuous(), Arc::new(TableSumBody))
            .scoped()
            .with_operand(table_op())
            .with_operand(c_op()),
        DerivationRule::new("TableCount", continuous(), Arc::new(TableCountBody))
            .scoped()
            .with_operand(table_op()),
        DerivationRule::new("TableMean", continuous(), Arc::new(TableMeanBody))
            .scoped()
            .with_operand(table_op())
            .with_operand(c_op()),
        DerivationRule::new("BlockSum", continuous(), Arc::new(BlockSumBody))
            .with_operand(block_op()),
        copy_block,
    ]
}

/// Fresh instance of a built-in family by name, with registration done on
/// demand.
pub fn builtin(name: &str) -> Option<DerivationRule> {
    let _ = register_builtin_rules();
    registry::new_instance(&Symbol::new(name))
}

struct CopyBody;

impl RuleBody for CopyBody {
    fn compute_continuous(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Continuous {
        rule.operand_continuous(0, ctx)
    }
}

struct SumBody;

impl RuleBody for SumBody {
    fn compute_continuous(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Continuous {
        let mut sum = Continuous::ZERO;
        for index in 0..rule.operand_count() {
            sum = sum + rule.operand_continuous(index, ctx);
        }
        sum
    }
}

struct DiffBody;

impl RuleBody for DiffBody {
    fn compute_continuous(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Continuous {
        rule.operand_continuous(0, ctx) - rule.operand_continuous(1, ctx)
    }
}

struct ProductBody;

impl RuleBody for ProductBody {
    fn compute_continuous(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Continuous {
        rule.operand_continuous(0, ctx) * rule.operand_continuous(1, ctx)
    }
}

/// Uniform in `[0, 1)`, seeded from the creation index so re-reads of the
/// same source reproduce the same draw.
struct RandomBody;

impl RuleBody for RandomBody {
    fn compute_continuous(&self, _rule: &CompiledRule, ctx: &mut EvalContext) -> Continuous {
        let seed = ctx.current().creation_index();
        let mut rng = StdRng::seed_from_u64(seed);
        Continuous::new(rng.gen::<f64>())
    }
}

struct AbsoluteDayBody;

impl RuleBody for AbsoluteDayBody {
    fn compute_continuous(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Continuous {
        match rule.operand_date(0, ctx).absolute_day() {
            Some(day) => Continuous::new(day as f64),
            None => Continuous::MISSING,
        }
    }
}

struct AddDaysBody;

impl RuleBody for AddDaysBody {
    fn compute_date(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Date {
        let date = rule.operand_date(0, ctx);
        let days = rule.operand_continuous(1, ctx);
        if days.is_missing() {
            return Date::INVALID;
        }
        date.add_days(days.value() as i64)
    }
}

struct DiffDaysBody;

impl RuleBody for DiffDaysBody {
    fn compute_continuous(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Continuous {
        let a = rule.operand_date(0, ctx);
        let b = rule.operand_date(1, ctx);
        match a.diff_days(b) {
            Some(days) => Continuous::new(days as f64),
            None => Continuous::MISSING,
        }
    }
}

struct IsDateValidBody;

impl RuleBody for IsDateValidBody {
    fn compute_continuous(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Continuous {
        Continuous::new(if rule.operand_date(0, ctx).is_valid() {
            1.0
        } else {
            0.0
        })
    }
}

struct TableSumBody;

impl RuleBody for TableSumBody {
    fn compute_continuous(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Continuous {
        let table = rule.operand_object_array(0, ctx);
        rule.open_scope(ctx);
        let mut sum = Continuous::ZERO;
        for handle in &table {
            rule.set_scope_object(ctx, handle.instance().clone());
            let value = rule.operand_continuous(1, ctx);
            if !value.is_missing() {
                sum = sum + value;
            }
        }
        rule.close_scope(ctx);
        sum
    }
}

struct TableCountBody;

impl RuleBody for TableCountBody {
    fn compute_continuous(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Continuous {
        Continuous::new(rule.operand_object_array(0, ctx).len() as f64)
    }
}

struct TableMeanBody;

impl RuleBody for TableMeanBody {
    fn compute_continuous(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Continuous {
        let table = rule.operand_object_array(0, ctx);
        rule.open_scope(ctx);
        let mut sum = 0.0;
        let mut count = 0u64;
        for handle in &table {
            rule.set_scope_object(ctx, handle.instance().clone());
            let value = rule.operand_continuous(1, ctx);
            if !value.is_missing() {
                sum += value.value();
                count += 1;
            }
        }
        rule.close_scope(ctx);
        if count == 0 {
            Continuous::MISSING
        } else {
            Continuous::new(sum / count as f64)
        }
    }
}

struct BlockSumBody;

impl RuleBody for BlockSumBody {
    fn compute_continuous(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Continuous {
        let block = rule.operand_continuous_block(0, ctx);
        let mut sum = Continuous::ZERO;
        for (_, value) in block.iter() {
            if !value.is_missing() {
                sum = sum + *value;
            }
        }
        sum
    }
}

struct CopyBlockBody;

impl RuleBody for CopyBlockBody {
    fn compute_continuous_block(
        &self,
        rule: &CompiledRule,
        ctx: &mut EvalContext,
    ) -> Rc<ContinuousValueBlock> {
        rule.operand_continuous_block(0, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::DiagnosticSink;

    #[test]
    fn test_builtins_register_idempotently() {
        register_builtin_rules().unwrap();
        register_builtin_rules().unwrap();
        assert!(registry::is_registered(&Symbol::new("Sum")));
        assert!(registry::is_registered(&Symbol::new("TableSum")));
    }

    #[test]
    fn test_builtin_prototypes_pass_definition() {
        let mut sink = DiagnosticSink::new();
        for rule in builtin_prototypes() {
            assert!(
                rule.check_definition(&mut sink),
                "prototype {} fails its definition check",
                rule.name
            );
        }
    }

    #[test]
    fn test_builtin_lookup() {
        let sum = builtin("Sum").expect("registered");
        assert_eq!(sum.operands.len(), 2);
        assert!(builtin("NoSuchRule").is_none());
    }
}
