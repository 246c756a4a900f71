// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Type-stack and module-structure validation.

mod common;

use assert_matches::assert_matches;
use common::*;
use waft::config::Config;
use waft::core_compat::alloc::Global;
use waft::error::{ErrorKind, WarningKind};
use waft::ValidationLevel;

fn full(bytes: &[u8]) -> Result<waft::Warnings<Global>, waft::Errors<Global>> {
    waft::validate_bytes(bytes, ValidationLevel::Full)
}

#[test]
fn errors_aggregate_across_functions_in_order() {
    // Three functions of type [] -> [i32]: the first and third bodies
    // produce an i64, the second is fine.
    let bad = func_body(&[], &[0x42, 0x00, 0x0b]); // i64.const 0; end
    let good = func_body(&[], &[0x41, 0x00, 0x0b]); // i32.const 0; end
    let bytes = module(&[
        type_section(&[(&[], &[I32])]),
        func_section(&[0, 0, 0]),
        code_section(&[bad.clone(), good, bad]),
    ]);

    let errors = full(&bytes).unwrap_err();
    assert_eq!(errors.len(), 2);
    assert_matches!(errors[0].kind, ErrorKind::TypeMismatch);
    assert_matches!(errors[1].kind, ErrorKind::TypeMismatch);

    // Each error is attributed to the offending function's `end` opcode, in
    // function order.
    let first_end = find(&bytes, &[0x42, 0x00, 0x0b]) + 2;
    assert_eq!(errors[0].offset, first_end);
    assert!(errors[1].offset > errors[0].offset);
}

#[test]
fn branch_out_of_scope_is_rejected_at_the_branch() {
    // block ; br 5 ; end ; end -- depth is 2 where 5 is referenced.
    let body = &[0x02, 0x40, 0x0c, 0x05, 0x0b, 0x0b];
    let bytes = module(&[
        type_section(&[(&[], &[])]),
        func_section(&[0]),
        code_section(&[func_body(&[], body)]),
    ]);

    let errors = full(&bytes).unwrap_err();
    assert_matches!(errors.first().kind, ErrorKind::InvalidLabel(5));
    assert_eq!(errors.first().offset, find(&bytes, &[0x0c, 0x05]));
}

#[test]
fn if_with_else_can_produce_a_result() {
    // i32.const 1; if (result i32) then i32.const 2 else i32.const 3 end;
    // the result satisfies the [] -> [i32] signature.
    let body = &[
        0x41, 0x01, // i32.const 1
        0x04, I32, // if (result i32)
        0x41, 0x02, // i32.const 2
        0x05, // else
        0x41, 0x03, // i32.const 3
        0x0b, // end
        0x0b, // end (function)
    ];
    let bytes = module(&[
        type_section(&[(&[], &[I32])]),
        func_section(&[0]),
        code_section(&[func_body(&[], body)]),
    ]);
    assert!(full(&bytes).is_ok());
}

#[test]
fn if_without_else_cannot_produce_a_result() {
    let body = &[
        0x41, 0x01, // i32.const 1
        0x04, I32, // if (result i32)
        0x41, 0x02, // i32.const 2
        0x0b, // end: no else to supply the false arm's value
        0x0b,
    ];
    let bytes = module(&[
        type_section(&[(&[], &[I32])]),
        func_section(&[0]),
        code_section(&[func_body(&[], body)]),
    ]);
    let errors = full(&bytes).unwrap_err();
    assert_matches!(errors.first().kind, ErrorKind::TypeMismatch);
}

#[test]
fn misplaced_else_is_rejected() {
    let body = &[0x05, 0x0b]; // else at function scope
    let bytes = module(&[
        type_section(&[(&[], &[])]),
        func_section(&[0]),
        code_section(&[func_body(&[], body)]),
    ]);
    let errors = full(&bytes).unwrap_err();
    assert_matches!(errors.first().kind, ErrorKind::MisplacedElse);
}

#[test]
fn br_table_accepts_empty_label_vector() {
    // block ; i32.const 0 ; br_table [] default 0 ; end ; end
    let body = &[0x02, 0x40, 0x41, 0x00, 0x0e, 0x00, 0x00, 0x0b, 0x0b];
    let bytes = module(&[
        type_section(&[(&[], &[])]),
        func_section(&[0]),
        code_section(&[func_body(&[], body)]),
    ]);
    assert!(full(&bytes).is_ok());
}

#[test]
fn br_table_accepts_many_labels() {
    // block ; i32.const 0 ; br_table [0; 500] default 0 ; end ; end
    let mut body = vec![0x02, 0x40, 0x41, 0x00, 0x0e];
    body.extend(leb_u32(500));
    body.extend(std::iter::repeat_n(0x00, 500));
    body.push(0x00); // default
    body.extend_from_slice(&[0x0b, 0x0b]);
    let bytes = module(&[
        type_section(&[(&[], &[])]),
        func_section(&[0]),
        code_section(&[func_body(&[], &body)]),
    ]);
    assert!(full(&bytes).is_ok());
}

#[test]
fn br_table_requires_matching_label_types() {
    // Outer block yields i32, inner yields nothing; a br_table targeting
    // both cannot type-check.
    let body = &[
        0x02, I32, // block (result i32)
        0x02, 0x40, // block
        0x41, 0x00, // i32.const 0 (selector)
        0x0e, 0x01, 0x00, 0x01, // br_table [0] default 1
        0x0b, // end (inner)
        0x0b, // end (outer)
        0x0b,
    ];
    let bytes = module(&[
        type_section(&[(&[], &[I32])]),
        func_section(&[0]),
        code_section(&[func_body(&[], body)]),
    ]);
    let errors = full(&bytes).unwrap_err();
    assert_matches!(errors.first().kind, ErrorKind::TypeMismatch);
}

#[test]
fn unreachable_code_warns_but_validates() {
    let body = &[0x00, 0x01, 0x0b]; // unreachable; nop; end
    let bytes = module(&[
        type_section(&[(&[], &[])]),
        func_section(&[0]),
        code_section(&[func_body(&[], body)]),
    ]);

    let warnings = full(&bytes).unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].kind, WarningKind::UnreachableCode);
    assert_eq!(warnings[0].func, 0);
    assert_eq!(warnings[0].offset, find(&bytes, &[0x00, 0x01, 0x0b]) + 1);

    // And not when warning collection is disabled.
    let mut config = Config::new();
    config.collect_warnings = false;
    let warnings = waft::validate_bytes_in(&bytes, ValidationLevel::Full, &config, Global).unwrap();
    assert!(warnings.is_empty());
}

#[test]
fn branches_make_the_stack_polymorphic() {
    // block (result i32): br 0 needs an i32 it doesn't have... except the
    // preceding `unreachable` makes the stack polymorphic, so it checks.
    let body = &[0x02, I32, 0x00, 0x0c, 0x00, 0x0b, 0x1a, 0x0b];
    let bytes = module(&[
        type_section(&[(&[], &[])]),
        func_section(&[0]),
        code_section(&[func_body(&[], body)]),
    ]);
    assert!(full(&bytes).is_ok());
}

#[test]
fn underflow_without_unreachable_is_rejected() {
    let body = &[0x6a, 0x0b]; // i32.add on an empty stack
    let bytes = module(&[
        type_section(&[(&[], &[])]),
        func_section(&[0]),
        code_section(&[func_body(&[], body)]),
    ]);
    let errors = full(&bytes).unwrap_err();
    assert_matches!(errors.first().kind, ErrorKind::StackUnderflow);
}

#[test]
fn duplicate_export_names_are_rejected() {
    let bytes = module(&[
        type_section(&[(&[], &[])]),
        func_section(&[0]),
        export_section(&[("x", 0x00, 0), ("x", 0x00, 0)]),
        code_section(&[func_body(&[], &[0x0b])]),
    ]);
    let errors = full(&bytes).unwrap_err();
    assert_matches!(errors.first().kind, ErrorKind::DuplicateExportName);
}

#[test]
fn start_function_must_have_empty_signature() {
    let bytes = module(&[
        type_section(&[(&[I32], &[])]),
        func_section(&[0]),
        section(8, &[0x00]), // start: function 0, which takes a parameter
        code_section(&[func_body(&[], &[0x0b])]),
    ]);
    let errors = full(&bytes).unwrap_err();
    assert_matches!(errors.first().kind, ErrorKind::InvalidStart(0));
}

#[test]
fn constant_expressions_reject_general_instructions() {
    // A global initialised with i32.add.
    let bytes = module(&[section(
        6,
        &[0x01, I32, 0x00, 0x41, 0x01, 0x41, 0x02, 0x6a, 0x0b],
    )]);
    let errors = full(&bytes).unwrap_err();
    assert_matches!(errors.first().kind, ErrorKind::ConstantExpressionViolation);
}

#[test]
fn constant_expressions_may_read_imported_immutable_globals() {
    // import (immutable i32 global) ; global i32 = global.get 0 -- fine.
    let import_body = {
        let mut body = leb_u32(1);
        body.extend(leb_u32(1));
        body.extend_from_slice(b"e");
        body.extend(leb_u32(1));
        body.extend_from_slice(b"g");
        body.extend_from_slice(&[0x03, I32, 0x00]);
        body
    };
    let bytes = module(&[
        section(2, &import_body),
        section(6, &[0x01, I32, 0x00, 0x23, 0x00, 0x0b]),
    ]);
    assert!(full(&bytes).is_ok());

    // Reading the module's own global in an initialiser is not constant.
    let bytes = module(&[section(
        6,
        &[
            0x02, // two globals
            I32, 0x00, 0x41, 0x00, 0x0b, // g0 = i32.const 0
            I32, 0x00, 0x23, 0x00, 0x0b, // g1 = global.get 0
        ],
    )]);
    let errors = full(&bytes).unwrap_err();
    assert_matches!(errors.first().kind, ErrorKind::ConstantExpressionViolation);
}

#[test]
fn writes_to_immutable_globals_are_rejected() {
    let bytes = module(&[
        type_section(&[(&[], &[])]),
        func_section(&[0]),
        section(6, &[0x01, I32, 0x00, 0x41, 0x00, 0x0b]), // immutable global
        code_section(&[func_body(&[], &[0x41, 0x01, 0x24, 0x00, 0x0b])]),
    ]);
    let errors = full(&bytes).unwrap_err();
    assert_matches!(errors.first().kind, ErrorKind::MutableGlobalWrite(0));
}

#[test]
fn mutable_globals_accept_writes() {
    let bytes = module(&[
        type_section(&[(&[], &[])]),
        func_section(&[0]),
        section(6, &[0x01, I32, 0x01, 0x41, 0x00, 0x0b]), // mutable global
        code_section(&[func_body(&[], &[0x41, 0x01, 0x24, 0x00, 0x0b])]),
    ]);
    assert!(full(&bytes).is_ok());
}

#[test]
fn excessive_alignment_is_rejected() {
    // i32.load with align 3 (2^3 > 4 bytes).
    let body = &[0x41, 0x00, 0x28, 0x03, 0x00, 0x1a, 0x0b];
    let bytes = module(&[
        type_section(&[(&[], &[])]),
        func_section(&[0]),
        section(5, &[0x01, 0x00, 0x01]), // memory
        code_section(&[func_body(&[], body)]),
    ]);
    let errors = full(&bytes).unwrap_err();
    assert_matches!(
        errors.first().kind,
        ErrorKind::InvalidAlignment {
            align: 3,
            width_log2: 2,
        }
    );

    // Natural alignment is fine.
    let body = &[0x41, 0x00, 0x28, 0x02, 0x00, 0x1a, 0x0b];
    let bytes = module(&[
        type_section(&[(&[], &[])]),
        func_section(&[0]),
        section(5, &[0x01, 0x00, 0x01]),
        code_section(&[func_body(&[], body)]),
    ]);
    assert!(full(&bytes).is_ok());
}

#[test]
fn memory_instructions_require_a_memory() {
    let body = &[0x41, 0x00, 0x28, 0x02, 0x00, 0x1a, 0x0b];
    let bytes = module(&[
        type_section(&[(&[], &[])]),
        func_section(&[0]),
        code_section(&[func_body(&[], body)]),
    ]);
    let errors = full(&bytes).unwrap_err();
    assert_matches!(errors.first().kind, ErrorKind::InvalidMemoryIndex(0));
}

#[test]
fn call_indirect_requires_a_table() {
    let body = &[0x41, 0x00, 0x11, 0x00, 0x00, 0x0b];
    let bytes = module(&[
        type_section(&[(&[], &[])]),
        func_section(&[0]),
        code_section(&[func_body(&[], body)]),
    ]);
    let errors = full(&bytes).unwrap_err();
    assert_matches!(errors.first().kind, ErrorKind::InvalidTableIndex(0));
}

#[test]
fn out_of_bounds_indices_are_rejected() {
    // call 1 where only function 0 exists.
    let bytes = module(&[
        type_section(&[(&[], &[])]),
        func_section(&[0]),
        code_section(&[func_body(&[], &[0x10, 0x01, 0x0b])]),
    ]);
    let errors = full(&bytes).unwrap_err();
    assert_matches!(errors.first().kind, ErrorKind::InvalidFunctionIndex(1));

    // local.get 0 in a function with no parameters or locals.
    let bytes = module(&[
        type_section(&[(&[], &[])]),
        func_section(&[0]),
        code_section(&[func_body(&[], &[0x20, 0x00, 0x1a, 0x0b])]),
    ]);
    let errors = full(&bytes).unwrap_err();
    assert_matches!(errors.first().kind, ErrorKind::InvalidLocalIndex(0));
}

#[test]
fn select_requires_matching_operands() {
    let body = &[0x41, 0x01, 0x42, 0x02, 0x41, 0x00, 0x1b, 0x1a, 0x0b];
    let bytes = module(&[
        type_section(&[(&[], &[])]),
        func_section(&[0]),
        code_section(&[func_body(&[], body)]),
    ]);
    let errors = full(&bytes).unwrap_err();
    assert_matches!(errors.first().kind, ErrorKind::TypeMismatch);

    let body = &[0x41, 0x01, 0x41, 0x02, 0x41, 0x00, 0x1b, 0x1a, 0x0b];
    let bytes = module(&[
        type_section(&[(&[], &[])]),
        func_section(&[0]),
        code_section(&[func_body(&[], body)]),
    ]);
    assert!(full(&bytes).is_ok());
}

#[test]
fn operand_stack_cap_is_enforced() {
    let mut config = Config::new();
    config.max_operand_stack = 4;

    let mut body = Vec::new();
    for value in 0..5u8 {
        body.extend_from_slice(&[0x41, value]); // i32.const
    }
    for _ in 0..5 {
        body.push(0x1a); // drop
    }
    body.push(0x0b);
    let bytes = module(&[
        type_section(&[(&[], &[])]),
        func_section(&[0]),
        code_section(&[func_body(&[], &body)]),
    ]);

    let errors =
        waft::validate_bytes_in(&bytes, ValidationLevel::Full, &config, Global).unwrap_err();
    assert_matches!(errors.first().kind, ErrorKind::StackOverflow);

    config.max_operand_stack = 5;
    assert!(waft::validate_bytes_in(&bytes, ValidationLevel::Full, &config, Global).is_ok());
}

#[test]
fn function_and_code_counts_must_match() {
    let bytes = module(&[type_section(&[(&[], &[])]), func_section(&[0])]);
    let errors = full(&bytes).unwrap_err();
    assert_matches!(
        errors.first().kind,
        ErrorKind::FunctionCountMismatch {
            functions: 1,
            bodies: 0,
        }
    );
}

#[test]
fn memory_limits_are_bounded_by_page_count() {
    // min = 65537 pages.
    let mut body = leb_u32(1);
    body.push(0x00);
    body.extend(leb_u32(65_537));
    let bytes = module(&[section(5, &body)]);
    let errors = full(&bytes).unwrap_err();
    assert_matches!(errors.first().kind, ErrorKind::InvalidLimits(_));

    // Inverted table limits.
    let bytes = module(&[section(4, &[0x01, FUNCREF, 0x01, 0x05, 0x02])]);
    let errors = full(&bytes).unwrap_err();
    assert_matches!(errors.first().kind, ErrorKind::InvalidLimits(_));
}

#[test]
fn saturating_truncations_validate_when_enabled() {
    let mut config = Config::new();
    config.saturating_truncation = true;

    // (f32) -> i32: local.get 0; i32.trunc_sat_f32_s; end
    let bytes = module(&[
        type_section(&[(&[F32], &[I32])]),
        func_section(&[0]),
        code_section(&[func_body(&[], &[0x20, 0x00, 0xfc, 0x00, 0x0b])]),
    ]);
    assert!(waft::validate_bytes_in(&bytes, ValidationLevel::Full, &config, Global).is_ok());

    // Applying it to an i64 operand fails.
    let bytes = module(&[
        type_section(&[(&[I64], &[I32])]),
        func_section(&[0]),
        code_section(&[func_body(&[], &[0x20, 0x00, 0xfc, 0x00, 0x0b])]),
    ]);
    let errors =
        waft::validate_bytes_in(&bytes, ValidationLevel::Full, &config, Global).unwrap_err();
    assert_matches!(errors.first().kind, ErrorKind::TypeMismatch);
}

#[test]
fn locals_participate_in_typing() {
    // (i32) -> i64 with an i64 local: local.get 1 yields the local's type.
    let bytes = module(&[
        type_section(&[(&[I32], &[I64])]),
        func_section(&[0]),
        code_section(&[func_body(&[(1, I64)], &[0x20, 0x01, 0x0b])]),
    ]);
    assert!(full(&bytes).is_ok());

    // Setting the i64 local with an i32 value fails.
    let bytes = module(&[
        type_section(&[(&[I32], &[I64])]),
        func_section(&[0]),
        code_section(&[func_body(
            &[(1, I64)],
            &[0x20, 0x00, 0x21, 0x01, 0x20, 0x01, 0x0b],
        )]),
    ]);
    let errors = full(&bytes).unwrap_err();
    assert_matches!(errors.first().kind, ErrorKind::TypeMismatch);
}

#[test]
fn loops_branch_to_their_entry() {
    // loop (result i32): i32.const 1; br_if 0 consumes the predicate and,
    // because a loop's label has no parameters, needs nothing else.
    let body = &[
        0x03, I32, // loop (result i32)
        0x41, 0x01, // i32.const 1
        0x41, 0x00, // i32.const 0 (predicate)
        0x0d, 0x00, // br_if 0 (to loop head, label type [])
        0x0b, // end (loop yields the i32)
        0x1a, // drop
        0x0b,
    ];
    let bytes = module(&[
        type_section(&[(&[], &[])]),
        func_section(&[0]),
        code_section(&[func_body(&[], body)]),
    ]);
    assert!(full(&bytes).is_ok());
}
