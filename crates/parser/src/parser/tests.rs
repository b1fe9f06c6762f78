use super::*;
use crate::ast::{BinOp, Declaration, Expr, InputSpec, LoopKind, ParamType, Stmt, UnaryOp};
use crate::error::ParseErrorKind;
use pretty_assertions::assert_eq;

// ============================================================================
// Helpers
// ============================================================================

fn parse_ok(source: &str) -> Script {
    let (script, lex_errors, parse_errors) = parse(source);
    assert!(lex_errors.is_empty(), "lex errors: {:?}", lex_errors);
    assert!(parse_errors.is_empty(), "parse errors: {:?}", parse_errors);
    script
}

fn parse_errors(source: &str) -> Vec<ParseError> {
    let (_, _, errors) = parse(source);
    errors
}

fn first_expr(source: &str) -> Expr {
    let script = parse_ok(&format!("x = {}\n", source));
    match &script.body[0].node {
        Stmt::Assign { value, .. } => value.node.clone(),
        other => panic!("expected assignment, got {:?}", other),
    }
}

fn num(n: f64) -> Expr {
    Expr::Number(n)
}

fn strip(expr: &Expr) -> String {
    match expr {
        Expr::Number(n) => crate::ast::format_number(*n),
        Expr::Var(v) => v.clone(),
        Expr::Binary { op, left, right } => {
            format!("({} {} {})", strip(&left.node), op.symbol(), strip(&right.node))
        }
        Expr::Unary { op, operand } => format!("({:?} {})", op, strip(&operand.node)),
        other => format!("{:?}", other),
    }
}

// ============================================================================
// Declarations
// ============================================================================

#[test]
fn test_parse_param_declaration() {
    let script = parse_ok(
        "PARAM city AS STRING LIKE \"London\" DESCRIPTION \"City name\"\nDESCRIPTION \"Gets weather\"\nTALK city\n",
    );
    assert_eq!(script.declarations.len(), 2);
    let Declaration::Param(param) = &script.declarations[0].node else {
        panic!("expected PARAM");
    };
    assert_eq!(param.name.node, "city");
    assert_eq!(param.ty.node, ParamType::String);
    assert_eq!(param.example.as_ref().map(|e| e.node.as_str()), Some("London"));
    assert_eq!(param.description.as_ref().map(|d| d.node.as_str()), Some("City name"));
    assert!(matches!(&script.declarations[1].node, Declaration::Description(d) if d.node == "Gets weather"));
}

#[test]
fn test_param_clauses_any_order_with_enum() {
    let script = parse_ok(
        "PARAM size AS string DESCRIPTION \"Size\" ENUM [\"S\", \"M\"] LIKE \"M\"\nPARAM qty AS INT LIKE 3\n",
    );
    let Declaration::Param(size) = &script.declarations[0].node else {
        panic!("expected PARAM");
    };
    assert_eq!(size.enum_values, vec!["S", "M"]);
    assert_eq!(size.example.as_ref().map(|e| e.node.as_str()), Some("M"));
    let Declaration::Param(qty) = &script.declarations[1].node else {
        panic!("expected PARAM");
    };
    assert_eq!(qty.ty.node, ParamType::Integer);
    assert_eq!(qty.example.as_ref().map(|e| e.node.as_str()), Some("3"));
}

#[test]
fn test_unknown_param_type() {
    let errors = parse_errors("PARAM x AS BLOB\n");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ParseErrorKind::UnknownType("BLOB".to_string()));
}

#[test]
fn test_declaration_after_statement() {
    let errors = parse_errors("TALK \"hi\"\nPARAM late AS STRING\nDESCRIPTION \"late\"\n");
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| matches!(
        e.kind,
        ParseErrorKind::DeclarationAfterStatement { .. }
    )));
    assert_eq!(errors[0].line, 2);
    assert_eq!(errors[1].line, 3);
}

// ============================================================================
// Statements
// ============================================================================

#[test]
fn test_talk_hear_talk() {
    let script = parse_ok("TALK \"What is your name?\"\nHEAR name\nTALK \"Hello, \" & name\n");
    assert_eq!(script.body.len(), 3);
    assert!(matches!(&script.body[1].node, Stmt::Hear { target, input: InputSpec::Any } if target.node == "name"));
}

#[test]
fn test_hear_typed_and_menu() {
    let script = parse_ok("HEAR mail AS EMAIL\nHEAR pick AS \"Yes\", \"No\"\nHEAR other AS choices\n");
    assert!(matches!(&script.body[0].node, Stmt::Hear { input: InputSpec::Typed(ParamType::Email), .. }));
    assert!(matches!(&script.body[1].node, Stmt::Hear { input: InputSpec::Menu(o), .. } if o.len() == 2));
    assert!(matches!(&script.body[2].node, Stmt::Hear { input: InputSpec::Menu(o), .. } if o.len() == 1));
}

#[test]
fn test_variables_are_lowercased() {
    let script = parse_ok("UserName = \"x\"\nTALK USERNAME\n");
    assert!(matches!(&script.body[0].node, Stmt::Assign { target, .. } if target.node == "username"));
    assert!(matches!(&script.body[1].node, Stmt::Talk(e) if e.node == Expr::Var("username".into())));
}

#[test]
fn test_if_elseif_else() {
    let script = parse_ok(
        "IF n > 10 THEN\n  TALK \"big\"\nELSEIF n > 5 THEN\n  TALK \"medium\"\nELSE IF n > 2 THEN\n  TALK \"small\"\nELSE\n  TALK \"tiny\"\nEND IF\n",
    );
    let Stmt::If { branches, else_body } = &script.body[0].node else {
        panic!("expected IF");
    };
    assert_eq!(branches.len(), 3);
    assert_eq!(else_body.as_ref().map(Vec::len), Some(1));
}

#[test]
fn test_single_line_if() {
    let script = parse_ok("IF ok THEN TALK \"yes\" ELSE TALK \"no\"\nTALK \"after\"\n");
    assert_eq!(script.body.len(), 2);
    let Stmt::If { branches, else_body } = &script.body[0].node else {
        panic!("expected IF");
    };
    assert_eq!(branches[0].body.len(), 1);
    assert!(else_body.is_some());
}

#[test]
fn test_for_loops() {
    let script = parse_ok(
        "FOR i = 1 TO 10 STEP 2\n  TALK i\nNEXT i\nFOR EACH item IN items\n  TALK item\nNEXT\n",
    );
    assert!(matches!(&script.body[0].node, Stmt::For { step: Some(_), body, .. } if body.len() == 1));
    assert!(matches!(&script.body[1].node, Stmt::ForEach { var, .. } if var.node == "item"));
}

#[test]
fn test_while_and_do_loops() {
    let script = parse_ok(
        "WHILE n < 3\n  n = n + 1\nWEND\nDO UNTIL n = 0\n  n = n - 1\nLOOP\nWHILE TRUE\n  EXIT WHILE\nEND WHILE\n",
    );
    assert_eq!(script.body.len(), 3);
    let Stmt::While { cond, .. } = &script.body[1].node else {
        panic!("expected DO UNTIL");
    };
    assert!(matches!(&cond.node, Expr::Unary { op: UnaryOp::Not, .. }));
    assert!(matches!(&script.body[2].node, Stmt::While { body, .. } if body[0].node == Stmt::Exit(LoopKind::Conditional)));
}

#[test]
fn test_select_case() {
    let script = parse_ok(
        "SELECT CASE choice\n  CASE \"a\", \"b\"\n    TALK \"ab\"\n  CASE \"c\"\n    TALK \"c\"\n  CASE ELSE\n    TALK \"other\"\nEND SELECT\n",
    );
    let Stmt::SelectCase { cases, else_body, .. } = &script.body[0].node else {
        panic!("expected SELECT");
    };
    assert_eq!(cases.len(), 2);
    assert_eq!(cases[0].values.len(), 2);
    assert!(else_body.is_some());
}

#[test]
fn test_keyword_phrases() {
    let script = parse_ok(
        "SET BOT MEMORY \"last\", city\nx = GET BOT MEMORY \"last\"\nUSE KB \"manuals\"\nclear tools\nanswer = LLM \"Summarize\"\npage = GET \"https://example.com\"\n",
    );
    let names: Vec<_> = script
        .body
        .iter()
        .map(|s| match &s.node {
            Stmt::Keyword(call) => call.name.clone(),
            other => panic!("expected keyword, got {:?}", other),
        })
        .collect();
    assert_eq!(
        names,
        vec!["SET BOT MEMORY", "GET BOT MEMORY", "USE KB", "CLEAR TOOLS", "LLM", "GET"]
    );
    assert!(matches!(&script.body[1].node, Stmt::Keyword(call) if call.target.as_ref().map(|t| t.node.as_str()) == Some("x")));
}

#[test]
fn test_keyword_argument_count() {
    let errors = parse_errors("SET BOT MEMORY \"only-key\"\n");
    assert_eq!(
        errors[0].kind,
        ParseErrorKind::ArgumentCount {
            keyword: "SET BOT MEMORY".to_string(),
            expected: "2".to_string(),
            found: 1,
        }
    );
}

#[test]
fn test_unknown_keyword_phrase() {
    let errors = parse_errors("SET x = 1\n");
    assert!(matches!(&errors[0].kind, ParseErrorKind::UnknownKeywordPhrase(p) if p == "SET x"));
}

#[test]
fn test_non_value_keyword_in_assignment() {
    let errors = parse_errors("x = USE KB \"docs\"\n");
    assert!(matches!(&errors[0].kind, ParseErrorKind::Invalid(m) if m.contains("does not return a value")));
}

#[test]
fn test_return_and_end() {
    let script = parse_ok("RETURN 42\nEND\n");
    assert!(matches!(&script.body[0].node, Stmt::Return(Some(e)) if e.node == num(42.0)));
    assert_eq!(script.body[1].node, Stmt::Return(None));
}

#[test]
fn test_colon_separates_statements() {
    let script = parse_ok("a = 1 : b = 2\n");
    assert_eq!(script.body.len(), 2);
}

// ============================================================================
// Block balance and recovery
// ============================================================================

#[test]
fn test_unclosed_if_reports_opening_line() {
    let errors = parse_errors("TALK \"start\"\nIF x THEN\n  TALK \"inside\"\n");
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].kind,
        ParseErrorKind::UnbalancedBlock {
            construct: "IF".to_string(),
            opening_line: 2,
        }
    );
}

#[test]
fn test_mismatched_closer_is_left_for_parent() {
    let errors = parse_errors("FOR i = 1 TO 3\n  IF i THEN\n    TALK i\nNEXT\n");
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0].kind,
        ParseErrorKind::UnbalancedBlock { ref construct, opening_line: 2 } if construct == "IF"
    ));
}

#[test]
fn test_stray_closer() {
    let errors = parse_errors("TALK \"x\"\nEND IF\nWEND\n");
    assert_eq!(errors.len(), 2);
    assert!(matches!(&errors[0].kind, ParseErrorKind::UnmatchedBlockEnd { closer, .. } if closer == "END IF"));
    assert!(matches!(&errors[1].kind, ParseErrorKind::UnmatchedBlockEnd { closer, .. } if closer == "WEND"));
}

#[test]
fn test_every_unclosed_block_is_reported() {
    let errors = parse_errors("WHILE a\n  SELECT CASE b\n    CASE 1\n      TALK b\n");
    let constructs: Vec<_> = errors
        .iter()
        .filter_map(|e| match &e.kind {
            ParseErrorKind::UnbalancedBlock { construct, opening_line } => {
                Some((construct.as_str(), *opening_line))
            }
            _ => None,
        })
        .collect();
    assert_eq!(constructs, vec![("SELECT", 2), ("WHILE", 1)]);
}

#[test]
fn test_errors_are_collected_across_lines() {
    let errors = parse_errors("x = \ny = (1 + \nTALK \"ok\"\nz 5\n");
    assert_eq!(errors.len(), 3);
    assert_eq!(errors.iter().map(|e| e.line).collect::<Vec<_>>(), vec![1, 2, 4]);
}

#[test]
fn test_exit_outside_loop() {
    let errors = parse_errors("EXIT FOR\n");
    assert_eq!(errors[0].kind, ParseErrorKind::ExitOutsideLoop("FOR".to_string()));
}

#[test]
fn test_trailing_tokens_after_statement() {
    let errors = parse_errors("TALK \"a\" \"b\"\n");
    assert_eq!(errors.len(), 1);
    assert!(matches!(&errors[0].kind, ParseErrorKind::UnexpectedToken { expected, .. } if expected == "end of line"));
}

// ============================================================================
// Expressions
// ============================================================================

#[test]
fn test_precedence() {
    assert_eq!(strip(&first_expr("1 + 2 * 3")), "(1 + (2 * 3))");
    assert_eq!(strip(&first_expr("(1 + 2) * 3")), "((1 + 2) * 3)");
    assert_eq!(strip(&first_expr("2 ^ 3 ^ 2")), "(2 ^ (3 ^ 2))");
    assert_eq!(strip(&first_expr("-2 ^ 2")), "(Neg (2 ^ 2))");
    assert_eq!(strip(&first_expr("a & b + 1")), "(a & (b + 1))");
    assert_eq!(strip(&first_expr("NOT a = b AND c")), "((Not (a = b)) AND c)");
    assert_eq!(strip(&first_expr("a OR b AND c")), "(a OR (b AND c))");
    assert_eq!(strip(&first_expr("10 MOD 3 - 1")), "((10 MOD 3) - 1)");
}

#[test]
fn test_calls_members_and_lists() {
    let expr = first_expr("LEN(Trim(name)) + items[0].price");
    let Expr::Binary { op: BinOp::Add, left, right } = expr else {
        panic!("expected addition");
    };
    assert!(matches!(&left.node, Expr::Call { name, args } if name == "LEN" && args.len() == 1));
    assert!(matches!(&right.node, Expr::Member { field, .. } if field == "price"));

    let list = first_expr("[1, \"two\", []]");
    assert!(matches!(list, Expr::List(items) if items.len() == 3));
}

#[test]
fn test_string_escapes() {
    assert_eq!(first_expr(r#""say ""hi""""#), Expr::Str("say \"hi\"".to_string()));
}

// ============================================================================
// Nesting limits
// ============================================================================

fn too_deep(errors: &[ParseError]) -> bool {
    errors
        .iter()
        .any(|e| matches!(e.kind, ParseErrorKind::NestingTooDeep { limit } if limit == MAX_NESTING_DEPTH))
}

#[test]
fn test_deep_parentheses_are_rejected() {
    let source = format!("x = {}1{}\nTALK \"after\"\n", "(".repeat(2000), ")".repeat(2000));
    let (script, _, errors) = parse(&source);
    assert!(too_deep(&errors), "{:?}", errors.first());
    // The parser recovers at the next line.
    assert!(matches!(script.body.last().map(|s| &s.node), Some(Stmt::Talk(_))));
}

#[test]
fn test_deep_prefix_operators_are_rejected() {
    let source = format!("x = {}1\n", "-".repeat(5000));
    assert!(too_deep(&parse_errors(&source)));
    let source = format!("x = {}TRUE\n", "NOT ".repeat(5000));
    assert!(too_deep(&parse_errors(&source)));
}

#[test]
fn test_deep_lists_and_blocks_are_rejected() {
    let source = format!("x = {}{}\n", "[".repeat(1000), "]".repeat(1000));
    assert!(too_deep(&parse_errors(&source)));

    let source = format!("{}TALK 1\n{}", "IF a THEN\n".repeat(500), "END IF\n".repeat(500));
    assert!(too_deep(&parse_errors(&source)));

    let source = format!("{}TALK 1\n", "IF a THEN ".repeat(500));
    assert!(too_deep(&parse_errors(&source)));
}

#[test]
fn test_moderate_nesting_is_accepted() {
    let value = first_expr(&format!("{}1{}", "(".repeat(100), ")".repeat(100)));
    assert_eq!(value, num(1.0));
    parse_ok(&format!("{}TALK 1\n{}", "WHILE a\n".repeat(50), "WEND\n".repeat(50)));
}

// ============================================================================
// Procedures and error handling
// ============================================================================

#[test]
fn test_sub_and_function_definitions() {
    let script = parse_ok(
        "CALL greet(\"Ana\")\ntotal = CALL add(1, 2)\n\
         SUB greet(name)\n  TALK \"Hi \" & name\nEND SUB\n\
         FUNCTION add(a, b)\n  RETURN a + b\nEND FUNCTION\n\
         SUB ping\n  TALK \"pong\"\nEND SUB\n",
    );
    assert_eq!(script.body.len(), 2);
    assert_eq!(script.procedures.len(), 3);

    let greet = &script.procedures[0];
    assert_eq!(greet.name.node, "greet");
    assert!(!greet.returns_value);
    assert_eq!(greet.params.iter().map(|p| p.node.as_str()).collect::<Vec<_>>(), ["name"]);

    let add = &script.procedures[1];
    assert!(add.returns_value);
    assert_eq!(add.params.len(), 2);
    assert!(matches!(add.body[0].node, Stmt::Return(Some(_))));
    assert!(script.procedures[2].params.is_empty());
    assert_eq!(script.procedure("add"), Some(1));

    assert!(matches!(
        &script.body[0].node,
        Stmt::Call { name, args, target: None } if name.node == "greet" && args.len() == 1
    ));
    assert!(matches!(
        &script.body[1].node,
        Stmt::Call { target: Some(t), .. } if t.node == "total"
    ));
}

#[test]
fn test_procedure_errors() {
    let errors = parse_errors("SUB a\nEND SUB\nSUB A\nEND SUB\n");
    assert!(matches!(
        &errors[..],
        [ParseError { kind: ParseErrorKind::DuplicateProcedure { name, first_line: 1, .. }, line: 3, .. }] if name == "a"
    ));

    let errors = parse_errors("IF x THEN\nSUB inner\nEND SUB\nEND IF\n");
    assert!(matches!(&errors[..], [ParseError { kind: ParseErrorKind::Invalid(_), line: 2, .. }]));

    let errors = parse_errors("SUB open\nTALK 1\n");
    assert!(matches!(
        &errors[..],
        [ParseError { kind: ParseErrorKind::UnbalancedBlock { opening_line: 1, .. }, .. }]
    ));

    let errors = parse_errors("TALK 1\nEND FUNCTION\n");
    assert!(matches!(&errors[..], [ParseError { kind: ParseErrorKind::UnmatchedBlockEnd { .. }, .. }]));
}

#[test]
fn test_exit_does_not_cross_procedure_boundary() {
    let errors = parse_errors("FOR i = 1 TO 3\n  CALL f\nNEXT\nSUB f\n  EXIT FOR\nEND SUB\n");
    assert!(matches!(&errors[..], [ParseError { kind: ParseErrorKind::ExitOutsideLoop(_), line: 5, .. }]));
}

#[test]
fn test_on_error_statements() {
    let script = parse_ok("On Error Resume Next\nx = 1\nON ERROR GOTO 0\n");
    assert_eq!(script.body[0].node, Stmt::OnError { resume_next: true });
    assert_eq!(script.body[2].node, Stmt::OnError { resume_next: false });

    let errors = parse_errors("ON ERROR STOP\n");
    assert!(matches!(&errors[..], [ParseError { kind: ParseErrorKind::UnexpectedToken { .. }, .. }]));
}
