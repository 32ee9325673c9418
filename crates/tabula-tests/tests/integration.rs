//! Integration tests for end-to-end Tabula evaluation.
//!
//! These tests verify the full pipeline:
//! Define schema → Check → Compile → Instantiate → Evaluate.

use std::rc::Rc;

use tabula_core::{
    Attribute, Class, ClassDomain, ConstantValue, DiagnosticSink, Instance, ObjectHandle, Operand,
    OperandOrigin, OperandSource, Value,
};
use tabula_tests::{
    CountedAgeBody, CountedCopyBody, TestBed, counted_age_prototype, instance_of, register,
    register_builtins, table_rule,
};
use tabula_core::{ContinuousValueBlock, MemoryGuard, ObjectArrayValueBlock};
use tabula_types::{Continuous, Date, LoadIndex, Symbol, ValueKind, VarKeyKind};

/// Compiling an already-compiled domain is a no-op: the snapshots and the
/// load-index assignment stay identical.
#[test]
fn test_compile_is_idempotent() {
    let mut bed = TestBed::customers();
    let before = bed.compiled("customer");
    let orders_index = bed.load_index("customer", "orders");

    let mut sink = DiagnosticSink::new();
    bed.domain
        .compile(&mut sink)
        .unwrap_or_else(|err| panic!("second compile failed: {err}"));

    let after = bed.compiled("customer");
    assert!(Rc::ptr_eq(&before, &after));
    assert!(sink.is_empty());
    assert_eq!(bed.load_index("customer", "orders"), orders_index);
    assert!(bed.domain.classes().all(|c| c.is_compiled()));
}

/// The customer layout assigns dense slots in attribute order.
#[test]
fn test_load_index_assignment() {
    let bed = TestBed::customers();
    assert_eq!(bed.load_index("customer", "name"), LoadIndex::dense(0));
    assert_eq!(bed.load_index("customer", "signup"), LoadIndex::dense(1));
    assert_eq!(bed.load_index("customer", "orders"), LoadIndex::dense(2));
    assert_eq!(bed.load_index("customer", "orderTotal"), LoadIndex::dense(3));
    assert_eq!(bed.load_index("customer", "orderCount"), LoadIndex::dense(4));
}

/// Two derived attributes reading each other must fail compilation with a
/// cycle diagnostic.
#[test]
fn test_cycle_rejection() {
    register_builtins();
    let mut class = Class::new("looper").rooted();
    let mut a = Attribute::new("a", ValueKind::Continuous);
    a.set_rule(instance_of(
        "CopyC",
        &[OperandOrigin::Attribute(Symbol::new("b"))],
    ));
    let mut b = Attribute::new("b", ValueKind::Continuous);
    b.set_rule(instance_of(
        "CopyC",
        &[OperandOrigin::Attribute(Symbol::new("a"))],
    ));
    class.insert_attribute(a).unwrap();
    class.insert_attribute(b).unwrap();

    let mut domain = ClassDomain::new("loops");
    domain.insert_class(class).unwrap();

    let mut sink = DiagnosticSink::new();
    assert!(!domain.detect_rule_cycles(&mut sink));
    assert!(domain.compile(&mut sink).is_err());
    assert!(
        sink.diagnostics()
            .iter()
            .any(|d| d.message.contains("cycle")),
        "expected a cycle diagnostic, got {:#?}",
        sink.diagnostics()
    );
}

/// A derived slot is computed on first read and cached afterwards; cleaning
/// forces one recomputation.
#[test]
fn test_lazy_caching() {
    register_builtins();
    let body = CountedCopyBody::new();
    register(
        tabula_core::DerivationRule::new(
            "GaugeCountedCopy",
            tabula_core::RuleType::simple(ValueKind::Continuous),
            body.clone(),
        )
        .with_operand(Operand::typed(ValueKind::Continuous)),
    );

    let mut class = Class::new("gauge").rooted();
    class
        .insert_attribute(Attribute::new("raw", ValueKind::Continuous))
        .unwrap();
    let mut copied = Attribute::new("copied", ValueKind::Continuous);
    copied.set_rule(instance_of(
        "GaugeCountedCopy",
        &[OperandOrigin::Attribute(Symbol::new("raw"))],
    ));
    class.insert_attribute(copied).unwrap();

    let mut domain = ClassDomain::new("gauges");
    domain.insert_class(class).unwrap();
    let mut bed = TestBed::from_domain(domain);

    let raw = bed.load_index("gauge", "raw");
    let derived = bed.load_index("gauge", "copied");
    let instance = bed.create("gauge");
    instance.set_continuous_at(raw, Continuous::new(42.0));

    assert_eq!(instance.compute_continuous_at(derived).value(), 42.0);
    assert_eq!(instance.compute_continuous_at(derived).value(), 42.0);
    assert_eq!(body.calls(), 1);
    assert_eq!(instance.get_continuous_at(derived).value(), 42.0);
    assert_eq!(body.calls(), 1);

    instance.clean_derived();
    assert_eq!(instance.compute_continuous_at(derived).value(), 42.0);
    assert_eq!(body.calls(), 2);
}

/// A scope level reaching past the available scope depth is a completeness
/// error; with one enclosing scope the same operand compiles and reads the
/// owner's attribute from inside the related record's scope.
#[test]
fn test_scope_arithmetic() {
    register_builtins();

    // depth 0: scope level 1 has nothing to reach
    let mut flat = Class::new("flat").rooted();
    flat.insert_attribute(Attribute::new("x", ValueKind::Continuous))
        .unwrap();
    let mut bad = Attribute::new("bad", ValueKind::Continuous);
    let mut rule = instance_of("CopyC", &[OperandOrigin::Attribute(Symbol::new("x"))]);
    rule.operands[0].scope_level = 1;
    bad.set_rule(rule);
    flat.insert_attribute(bad).unwrap();

    let mut domain = ClassDomain::new("flats");
    domain.insert_class(flat).unwrap();
    let mut sink = DiagnosticSink::new();
    assert!(domain.compile(&mut sink).is_err());
    assert!(
        sink.diagnostics()
            .iter()
            .any(|d| d.message.contains("exceeds scope depth")),
        "expected a scope depth diagnostic, got {:#?}",
        sink.diagnostics()
    );

    // depth 1: the secondary scope of a table aggregate reaches the owner
    let mut order = Class::new("order");
    order
        .insert_attribute(Attribute::new("amount", ValueKind::Continuous))
        .unwrap();
    let mut customer = Class::new("customer").rooted();
    customer
        .insert_attribute(Attribute::new("discount", ValueKind::Continuous))
        .unwrap();
    customer
        .insert_attribute(Attribute::relation(
            "orders",
            ValueKind::ObjectArray,
            "order",
            false,
        ))
        .unwrap();
    let mut scaled = Attribute::new("scaled", ValueKind::Continuous);
    let mut rule = instance_of(
        "TableSum",
        &[
            OperandOrigin::Attribute(Symbol::new("orders")),
            OperandOrigin::Attribute(Symbol::new("discount")),
        ],
    );
    rule.operands[1].scope_level = 1;
    scaled.set_rule(rule);
    customer.insert_attribute(scaled).unwrap();

    let mut domain = ClassDomain::new("scoped_shop");
    domain.insert_class(order).unwrap();
    domain.insert_class(customer).unwrap();
    let mut bed = TestBed::from_domain(domain);

    // the compiled operand reads one frame out
    let compiled = bed.compiled("customer");
    let scaled_slot = compiled.attribute_at(bed.load_index("customer", "scaled"));
    let rule = scaled_slot.rule.as_ref().unwrap();
    assert!(matches!(
        rule.operands[1].source,
        OperandSource::UpperScope { hops: 1, slot: 0 }
    ));

    let customer_li = bed.load_index("customer", "discount");
    let orders_li = bed.load_index("customer", "orders");
    let scaled_li = bed.load_index("customer", "scaled");
    let one = bed.create("order");
    let two = bed.create("order");
    let holder = bed.create("customer");
    holder.set_continuous_at(customer_li, Continuous::new(2.5));
    holder.set_object_array_at(
        orders_li,
        vec![ObjectHandle::Owned(one), ObjectHandle::Owned(two)],
    );
    // discount summed once per order through the upper-scope slot
    assert_eq!(holder.compute_continuous_at(scaled_li).value(), 5.0);
}

/// Variable-arity families accept any operand count down to one below the
/// prototype and reject anything shorter.
#[test]
fn test_variable_arity_family() {
    register_builtins();
    let prototype = tabula_core::registry::lookup(&Symbol::new("Sum")).unwrap();
    assert_eq!(prototype.operands.len(), 2);

    for count in [1usize, 2, 7] {
        let mut rule = instance_of(
            "Sum",
            &[
                OperandOrigin::Attribute(Symbol::new("x")),
                OperandOrigin::Attribute(Symbol::new("x")),
            ],
        );
        rule.operands = (0..count)
            .map(|_| Operand::attribute(ValueKind::Continuous, "x"))
            .collect();
        let mut sink = DiagnosticSink::new();
        assert!(
            rule.check_family(&prototype, &mut sink),
            "count {count} rejected: {:#?}",
            sink.diagnostics()
        );
    }

    let mut rule = instance_of("Sum", &[
        OperandOrigin::Attribute(Symbol::new("x")),
        OperandOrigin::Attribute(Symbol::new("x")),
    ]);
    rule.operands.clear();
    let mut sink = DiagnosticSink::new();
    assert!(!rule.check_family(&prototype, &mut sink));
}

/// Date arithmetic never fails: invalid inputs flow through as the invalid
/// sentinel and validity checks report them as 0.
#[test]
fn test_date_sentinel_semantics() {
    register_builtins();
    let mut class = Class::new("span").rooted();
    class
        .insert_attribute(Attribute::new("start", ValueKind::Date))
        .unwrap();
    let mut moved = Attribute::new("moved", ValueKind::Date);
    moved.set_rule(instance_of(
        "AddDays",
        &[
            OperandOrigin::Attribute(Symbol::new("start")),
            OperandOrigin::Constant(ConstantValue::Continuous(Continuous::new(5.0))),
        ],
    ));
    class.insert_attribute(moved).unwrap();
    let mut valid = Attribute::new("valid", ValueKind::Continuous);
    valid.set_rule(instance_of(
        "IsDateValid",
        &[OperandOrigin::Attribute(Symbol::new("moved"))],
    ));
    class.insert_attribute(valid).unwrap();

    let mut domain = ClassDomain::new("spans");
    domain.insert_class(class).unwrap();
    let mut bed = TestBed::from_domain(domain);

    let start = bed.load_index("span", "start");
    let moved = bed.load_index("span", "moved");
    let valid = bed.load_index("span", "valid");

    // unset start is the invalid sentinel; AddDays passes it through
    let missing = bed.create("span");
    assert!(!missing.compute_date_at(moved).is_valid());
    assert_eq!(missing.compute_continuous_at(valid).value(), 0.0);

    let set = bed.create("span");
    set.set_date_at(start, Date::new(2000, 1, 1));
    assert_eq!(set.compute_date_at(moved), Date::new(2000, 1, 6));
    assert_eq!(set.compute_continuous_at(valid).value(), 1.0);
}

/// Table aggregates over owned sub-records.
#[test]
fn test_table_aggregates() {
    let mut bed = TestBed::customers();
    let amount = bed.load_index("order", "amount");
    let orders_li = bed.load_index("customer", "orders");
    let total_li = bed.load_index("customer", "orderTotal");
    let count_li = bed.load_index("customer", "orderCount");

    let mut handles = Vec::new();
    for value in [10.0, 20.0, 12.5] {
        let order = bed.create("order");
        order.set_continuous_at(amount, Continuous::new(value));
        handles.push(ObjectHandle::Owned(order));
    }
    let customer = bed.create("customer");
    customer.set_object_array_at(orders_li, handles);

    assert_eq!(customer.compute_continuous_at(total_li).value(), 42.5);
    assert_eq!(customer.compute_continuous_at(count_li).value(), 3.0);

    // an empty table sums to zero and counts zero
    let empty = bed.create("customer");
    assert_eq!(empty.compute_continuous_at(total_li).value(), 0.0);
    assert_eq!(empty.compute_continuous_at(count_li).value(), 0.0);
}

/// Sparse blocks: member attributes resolve through sparse load indices,
/// block rules consume whole blocks, and a derived block mirrors its
/// source pair-for-pair.
#[test]
fn test_sparse_blocks_end_to_end() {
    register_builtins();
    let mut profile = Class::new("profile").rooted();
    for name in ["strength", "speed", "stamina"] {
        profile
            .insert_attribute(Attribute::new(name, ValueKind::Continuous))
            .unwrap();
    }
    profile
        .create_attribute_block(
            "traits",
            &Symbol::new("strength"),
            &Symbol::new("stamina"),
            VarKeyKind::Symbol,
        )
        .unwrap();

    let mut total = Attribute::new("total", ValueKind::Continuous);
    total.set_rule(instance_of(
        "BlockSum",
        &[OperandOrigin::Attribute(Symbol::new("traits"))],
    ));
    profile.insert_attribute(total).unwrap();

    for name in ["m1", "m2", "m3"] {
        profile
            .insert_attribute(Attribute::new(name, ValueKind::Continuous))
            .unwrap();
    }
    profile
        .create_attribute_block(
            "mirror",
            &Symbol::new("m1"),
            &Symbol::new("m3"),
            VarKeyKind::Symbol,
        )
        .unwrap();
    profile
        .block_mut(&Symbol::new("mirror"))
        .unwrap()
        .set_rule(instance_of(
            "CopyBlock",
            &[OperandOrigin::Attribute(Symbol::new("traits"))],
        ));

    let mut domain = ClassDomain::new("profiles");
    domain.insert_class(profile).unwrap();
    let mut bed = TestBed::from_domain(domain);

    let traits_li = bed.load_index("profile", "traits");
    assert!(traits_li.is_dense());
    let strength = bed.load_index("profile", "strength");
    assert!(strength.is_sparse());

    let instance = bed.create("profile");
    // speed (position 1) left out of the sparse pairs
    instance.set_continuous_block_at(
        traits_li,
        Rc::new(ContinuousValueBlock::from_pairs(vec![
            (0, Continuous::new(10.0)),
            (2, Continuous::new(30.0)),
        ])),
    );

    assert_eq!(instance.compute_continuous_at(strength).value(), 10.0);
    assert!(
        instance
            .compute_continuous_at(bed.load_index("profile", "speed"))
            .is_missing()
    );
    assert_eq!(
        instance
            .compute_continuous_at(bed.load_index("profile", "total"))
            .value(),
        40.0
    );
    // the derived block hands back the source pairs position-for-position
    assert_eq!(
        instance
            .compute_continuous_at(bed.load_index("profile", "m1"))
            .value(),
        10.0
    );
    assert!(
        instance
            .compute_continuous_at(bed.load_index("profile", "m2"))
            .is_missing()
    );
}

/// Narrowing mutation to a loaded-attribute prefix keeps the surviving
/// values bit-for-bit; a dropped owned sub-record is either retained or
/// freed exactly once.
#[test]
fn test_mutation_prefix_safety() {
    fn part_class() -> Class {
        let mut part = Class::new("part");
        part.insert_attribute(Attribute::new("weight", ValueKind::Continuous))
            .unwrap();
        part
    }
    fn thing_class(with_part: bool) -> Class {
        let mut thing = Class::new("thing").rooted();
        thing
            .insert_attribute(Attribute::new("a", ValueKind::Continuous))
            .unwrap();
        thing
            .insert_attribute(Attribute::new("b", ValueKind::Continuous))
            .unwrap();
        if with_part {
            thing
                .insert_attribute(Attribute::relation("c", ValueKind::Object, "part", false))
                .unwrap();
        }
        thing
    }

    let mut wide_domain = ClassDomain::new("widgets");
    wide_domain.insert_class(part_class()).unwrap();
    wide_domain.insert_class(thing_class(true)).unwrap();
    let mut wide = TestBed::from_domain(wide_domain);

    let mut narrow_domain = ClassDomain::new("widgets");
    narrow_domain.insert_class(part_class()).unwrap();
    narrow_domain.insert_class(thing_class(false)).unwrap();
    let narrow = TestBed::from_domain(narrow_domain);

    let a = wide.load_index("thing", "a");
    let b = wide.load_index("thing", "b");
    let c = wide.load_index("thing", "c");
    let narrow_thing = narrow.compiled("thing");
    let class_map = narrow.class_map();

    // keep: the dropped owned sub-record moves to the retained map
    let kept = wide.create("thing");
    kept.set_continuous_at(a, Continuous::new(1.5));
    kept.set_continuous_at(b, Continuous::new(2.5));
    let part = wide.create("part");
    let part_weak = Rc::downgrade(&part);
    kept.set_object_at(c, Some(ObjectHandle::Owned(part)));

    kept.mutate(&narrow_thing, &class_map, &[Symbol::new("c")]);
    assert_eq!(kept.class().slot_count(), 2);
    assert_eq!(kept.get_continuous_at(a).value(), 1.5);
    assert_eq!(kept.get_continuous_at(b).value(), 2.5);
    assert!(part_weak.upgrade().is_some());
    match kept.retained_value(&Symbol::new("c")) {
        Some(Value::Object(Some(handle))) => assert!(handle.is_owned()),
        other => panic!("retained c is {other:?}"),
    }

    // no keep: the dropped owned sub-record is freed with the slot
    let freed = wide.create("thing");
    freed.set_continuous_at(a, Continuous::new(3.0));
    let part = wide.create("part");
    let part_weak = Rc::downgrade(&part);
    freed.set_object_at(c, Some(ObjectHandle::Owned(part)));
    assert!(part_weak.upgrade().is_some());

    freed.mutate(&narrow_thing, &class_map, &[]);
    assert_eq!(freed.get_continuous_at(a).value(), 3.0);
    assert!(part_weak.upgrade().is_none());
    assert!(freed.retained_value(&Symbol::new("c")).is_none());
}

/// Owned sub-records reachable only through a block of object arrays are
/// forced by whole-record computation and re-pointed by mutation, like
/// sub-records in plain relation slots.
#[test]
fn test_block_held_sub_records_force_and_mutate() {
    register_builtins();
    fn part_class(wide: bool) -> Class {
        let mut part = Class::new("part");
        part.insert_attribute(Attribute::new("weight", ValueKind::Continuous))
            .unwrap();
        let mut doubled = Attribute::new("doubled", ValueKind::Continuous);
        doubled.set_rule(instance_of(
            "Sum",
            &[
                OperandOrigin::Attribute(Symbol::new("weight")),
                OperandOrigin::Attribute(Symbol::new("weight")),
            ],
        ));
        part.insert_attribute(doubled).unwrap();
        if wide {
            part.insert_attribute(Attribute::new("extra", ValueKind::Continuous))
                .unwrap();
        }
        part
    }
    fn container_class() -> Class {
        let mut container = Class::new("container").rooted();
        for name in ["binA", "binB"] {
            container
                .insert_attribute(Attribute::relation(
                    name,
                    ValueKind::ObjectArray,
                    "part",
                    false,
                ))
                .unwrap();
        }
        container
            .create_attribute_block(
                "bins",
                &Symbol::new("binA"),
                &Symbol::new("binB"),
                VarKeyKind::Symbol,
            )
            .unwrap();
        container
    }

    let mut wide_domain = ClassDomain::new("depot");
    wide_domain.insert_class(part_class(true)).unwrap();
    wide_domain.insert_class(container_class()).unwrap();
    let mut wide = TestBed::from_domain(wide_domain);

    let mut narrow_domain = ClassDomain::new("depot");
    narrow_domain.insert_class(part_class(false)).unwrap();
    narrow_domain.insert_class(container_class()).unwrap();
    let narrow = TestBed::from_domain(narrow_domain);

    let weight = wide.load_index("part", "weight");
    let doubled = wide.load_index("part", "doubled");
    let bins = wide.load_index("container", "bins");

    let one = wide.create("part");
    one.set_continuous_at(weight, Continuous::new(3.0));
    let two = wide.create("part");
    two.set_continuous_at(weight, Continuous::new(5.0));
    let container = wide.create("container");
    container.set_object_array_block_at(
        bins,
        Rc::new(ObjectArrayValueBlock::from_pairs(vec![
            (0, vec![ObjectHandle::Owned(one.clone())]),
            (1, vec![ObjectHandle::Owned(two.clone())]),
        ])),
    );

    assert!(container.compute_all_values(&mut MemoryGuard::unlimited()));
    // block-held parts were forced along with the container
    assert_eq!(one.get_continuous_at(doubled).value(), 6.0);
    assert_eq!(two.get_continuous_at(doubled).value(), 10.0);

    let narrow_container = narrow.compiled("container");
    let narrow_part = narrow.compiled("part");
    container.mutate(&narrow_container, &narrow.class_map(), &[]);
    assert!(Rc::ptr_eq(&one.class(), &narrow_part));
    assert_eq!(two.class().slot_count(), 2);
    assert_eq!(one.get_continuous_at(weight).value(), 3.0);
}

/// Mutating to the unchanged class is a no-op that keeps every slot.
#[test]
fn test_mutation_same_class() {
    let mut bed = TestBed::customers();
    let name = bed.load_index("customer", "name");
    let customer = bed.create("customer");
    customer.set_symbol_at(name, Symbol::new("ada"));

    let class = bed.compiled("customer");
    customer.mutate(&class, &bed.class_map(), &[]);
    assert_eq!(customer.get_symbol_at(name), Symbol::new("ada"));
    assert_eq!(customer.class().slot_count(), 5);
}

/// A derived age reads the birth date without touching it, and a second
/// read hits the cache.
#[test]
fn test_person_age_end_to_end() {
    let body = CountedAgeBody::new();
    register(counted_age_prototype("PersonAgeDays", body.clone()));

    let mut person = Class::new("person").rooted();
    person
        .insert_attribute(Attribute::new("name", ValueKind::Symbol))
        .unwrap();
    person
        .insert_attribute(Attribute::new("birth", ValueKind::Date))
        .unwrap();
    let mut age = Attribute::new("ageAtRef", ValueKind::Continuous);
    age.set_rule(
        instance_of(
            "PersonAgeDays",
            &[
                OperandOrigin::Attribute(Symbol::new("birth")),
                OperandOrigin::Constant(ConstantValue::Date(Date::new(2020, 1, 1))),
            ],
        ),
    );
    person.insert_attribute(age).unwrap();

    let mut domain = ClassDomain::new("people");
    domain.insert_class(person).unwrap();
    let mut bed = TestBed::from_domain(domain);

    let birth = bed.load_index("person", "birth");
    let age = bed.load_index("person", "ageAtRef");
    let instance: Rc<Instance> = bed.create("person");
    instance.set_date_at(birth, Date::new(2000, 1, 1));

    // 20 years with five leap days in between
    assert_eq!(instance.compute_continuous_at(age).value(), 7305.0);
    assert_eq!(instance.get_date_at(birth), Date::new(2000, 1, 1));
    assert_eq!(instance.compute_continuous_at(age).value(), 7305.0);
    assert_eq!(body.calls(), 1);
}
