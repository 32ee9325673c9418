//! Integration test harness for Tabula.
//!
//! This crate provides utilities for end-to-end testing of the full
//! pipeline: Define schema → Check → Compile → Instantiate → Evaluate.

use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use indexmap::IndexMap;

use tabula_core::{
    Attribute, Class, ClassDomain, CompiledClass, CompiledRule, DerivationRule, DiagnosticSink,
    Error, EvalContext, Instance, Operand, OperandOrigin, RuleBody, RuleType,
    register_builtin_rules, registry,
};
use tabula_types::{Continuous, LoadIndex, Symbol, ValueKind};

/// Test bed around a compiled [`ClassDomain`] with an instance factory.
pub struct TestBed {
    pub domain: ClassDomain,
    next_creation: u64,
}

impl TestBed {
    /// Compiles the given domain and wraps it.
    ///
    /// # Panics
    ///
    /// Panics if checking or compilation fails, printing the accumulated
    /// diagnostics.
    pub fn from_domain(mut domain: ClassDomain) -> Self {
        let mut sink = DiagnosticSink::new();
        if let Err(err) = domain.compile(&mut sink) {
            panic!("compilation failed: {err}\n{:#?}", sink.diagnostics());
        }
        Self {
            domain,
            next_creation: 1,
        }
    }

    /// A two-class domain: root `customer` records owning a table of
    /// `order` sub-records, with table aggregates derived on the customer.
    ///
    /// ```text
    /// order:    amount, quantity                        (all native)
    /// customer: name, signup, orders -> [order],
    ///           orderTotal = TableSum(orders, amount),
    ///           orderCount = TableCount(orders)
    /// ```
    pub fn customers() -> Self {
        register_builtins();

        let mut order = Class::new("order");
        order
            .insert_attribute(Attribute::new("amount", ValueKind::Continuous))
            .and_then(|()| order.insert_attribute(Attribute::new("quantity", ValueKind::Continuous)))
            .unwrap();

        let mut customer = Class::new("customer").rooted();
        customer
            .insert_attribute(Attribute::new("name", ValueKind::Symbol))
            .and_then(|()| customer.insert_attribute(Attribute::new("signup", ValueKind::Date)))
            .and_then(|()| {
                customer.insert_attribute(Attribute::relation(
                    "orders",
                    ValueKind::ObjectArray,
                    "order",
                    false,
                ))
            })
            .unwrap();

        let mut total = Attribute::new("orderTotal", ValueKind::Continuous);
        total.set_rule(table_rule("TableSum", "orders", Some("amount")));
        customer.insert_attribute(total).unwrap();

        let mut count = Attribute::new("orderCount", ValueKind::Continuous);
        count.set_rule(table_rule("TableCount", "orders", None));
        customer.insert_attribute(count).unwrap();

        let mut domain = ClassDomain::new("shop");
        domain
            .insert_class(order)
            .and_then(|()| domain.insert_class(customer))
            .unwrap();
        Self::from_domain(domain)
    }

    /// Compiled snapshot of a class, by name.
    pub fn compiled(&self, class: &str) -> Rc<CompiledClass> {
        let name = Symbol::new(class);
        self.domain
            .get(&name)
            .and_then(|c| c.compiled())
            .unwrap_or_else(|| panic!("class {class} is not compiled"))
            .clone()
    }

    /// A fresh instance of a compiled class, with a bed-unique creation
    /// index.
    pub fn create(&mut self, class: &str) -> Rc<Instance> {
        let index = self.next_creation;
        self.next_creation += 1;
        Instance::new(self.compiled(class), index)
    }

    /// Load index of an attribute or block, by class and member name.
    pub fn load_index(&self, class: &str, name: &str) -> LoadIndex {
        let compiled = self.compiled(class);
        compiled
            .load_index(&Symbol::new(name))
            .unwrap_or_else(|| panic!("{name} has no load index in class {class}"))
    }

    /// Name-to-snapshot map over every compiled class, as instance
    /// mutation wants it.
    pub fn class_map(&self) -> IndexMap<Symbol, Rc<CompiledClass>> {
        self.domain
            .classes()
            .filter_map(|c| Some((c.name.clone(), c.compiled()?.clone())))
            .collect()
    }
}

/// Registers the built-in rule families, tolerating a prior registration
/// from another test in the same process.
pub fn register_builtins() {
    if let Err(err) = register_builtin_rules() {
        panic!("built-in registration failed: {err}");
    }
}

/// Registers a test-local rule family. Safe to call twice with the same
/// prototype.
pub fn register(rule: DerivationRule) {
    match registry::register(rule) {
        Ok(()) | Err(Error::DuplicateRule(_)) => {}
        Err(err) => panic!("registration failed: {err}"),
    }
}

/// Instance of a built-in family with every operand origin filled in.
pub fn instance_of(family: &str, origins: &[OperandOrigin]) -> DerivationRule {
    let mut rule = tabula_core::ops::builtin(family)
        .unwrap_or_else(|| panic!("unknown built-in family {family}"));
    assert_eq!(rule.operands.len(), origins.len(), "operand count mismatch");
    for (operand, origin) in rule.operands.iter_mut().zip(origins) {
        operand.origin = origin.clone();
    }
    rule
}

/// Table aggregate over an ObjectArray attribute of the owner, reading an
/// optional member attribute of the related class.
pub fn table_rule(family: &str, table: &str, member: Option<&str>) -> DerivationRule {
    let mut origins = vec![OperandOrigin::Attribute(Symbol::new(table))];
    if let Some(member) = member {
        origins.push(OperandOrigin::Attribute(Symbol::new(member)));
    }
    instance_of(family, &origins)
}

/// Continuous copy body that counts how many times the engine invokes it.
/// Shared through its `Arc` between the registered prototype and the test
/// asserting on the count.
#[derive(Default)]
pub struct CountedCopyBody {
    calls: AtomicU32,
}

impl CountedCopyBody {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RuleBody for CountedCopyBody {
    fn compute_continuous(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Continuous {
        self.calls.fetch_add(1, Ordering::SeqCst);
        rule.operand_continuous(0, ctx)
    }
}

/// Day count from a Date operand to a constant reference date, counting
/// invocations. Missing on either invalid end.
pub struct CountedAgeBody {
    calls: AtomicU32,
}

impl CountedAgeBody {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RuleBody for CountedAgeBody {
    fn compute_continuous(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Continuous {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let birth = rule.operand_date(0, ctx);
        let reference = rule.operand_date(1, ctx);
        match reference.diff_days(birth) {
            Some(days) => Continuous::new(days as f64),
            None => Continuous::MISSING,
        }
    }
}

/// Prototype of a counted two-date rule family: operand 0 is the date
/// under test, operand 1 the reference date.
pub fn counted_age_prototype(name: &str, body: Arc<CountedAgeBody>) -> DerivationRule {
    DerivationRule::new(name, RuleType::simple(ValueKind::Continuous), body)
        .with_operand(Operand::typed(ValueKind::Date))
        .with_operand(Operand::typed(ValueKind::Date))
}
