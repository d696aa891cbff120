use css_expr_oxide::{
    evaluate, evaluate_tokens, evaluate_value, parse, split, EmptyContext, EvalError, ExprError,
    ParseError, Scope, Token, TokenKind, Value,
};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};

fn eval(expression: &str) -> String {
    evaluate(expression, &EmptyContext).unwrap().to_string()
}

#[test]
fn operator_precedence() {
    assert_eq!(eval("1+2"), "3");
    assert_eq!(eval("1 - 2"), "-1");
    assert_eq!(eval("1 + 2 * 3"), "7");
    assert_eq!(eval("((1 + 2) * 3) / 9"), "1");
    assert_eq!(eval("-3 + 2"), "-1");
    assert_eq!(eval("6 / -2"), "-3");
}

#[test]
fn tokens_evaluate_like_source() {
    let context = EmptyContext;
    for expression in [
        "1 + 2",
        "(1 + 2) * 3",
        "100% / 4",
        "3 * #111",
        "1px solid red",
        "rgba(0, 0, 0, .5)",
        "'a' + 'b'",
    ] {
        let tokens = parse(expression).unwrap();
        assert_eq!(
            evaluate_tokens(&tokens, &context).unwrap().to_string(),
            eval(expression),
            "{expression}"
        );
    }
}

#[test]
fn parse_is_deterministic() {
    let first = parse("lighten(@a, 10%) + 2px").unwrap();
    let second = parse("lighten(@a, 10%) + 2px").unwrap();
    assert_eq!(first, second);
    assert_eq!(first.source(), "lighten(@a, 10%) + 2px");
}

#[test]
fn css_values() {
    let mut scope = Scope::new();
    scope.set("@gap", "12px").set("@brand", "#336699");

    assert_eq!(evaluate_value("-(@gap / 2)", &scope).unwrap(), "-6px");
    assert_eq!(evaluate_value("@gap * -2", &scope).unwrap(), "-24px");
    assert_eq!(
        evaluate_value("0 0 5px fade(@brand, 30%)", &scope).unwrap(),
        "0 0 5px rgba(51, 102, 153, 0.3)"
    );
    assert_eq!(
        evaluate_value("darken(@brand, 10%) !important", &scope).unwrap(),
        "#264c73 !important"
    );
}

#[test]
fn unresolved_names_are_reported_not_raised() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let mut scope = Scope::new().with_logger(move |_, diagnostic| {
        sink.lock()
            .unwrap()
            .push(format!("{} {}", diagnostic.kind, diagnostic.name));
    });
    scope.set("@a", 2.0).set("@b", 4.0);

    let result = evaluate("bar(@a, @b) @missing", &scope).unwrap();
    assert_eq!(result.to_string(), "bar(2, 4) @missing");
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["function bar".to_string(), "variable @missing".to_string()]
    );
}

#[test]
fn host_functions_receive_arguments() {
    let mut scope = Scope::new();
    scope.define("sum", |args| {
        let total: f64 = args.iter().filter_map(Token::as_number).sum();
        Ok(Some(Value::Number(total)))
    });
    scope.define("twice", |args| {
        Ok(args.first().map(|arg| Value::Text(format!("{arg} * 2"))))
    });

    let result = evaluate("sum(1, 2, 3) + 1", &scope).unwrap();
    assert_eq!(result.as_number(), Some(7.0));
    assert_eq!(evaluate("twice(4px)", &scope).unwrap().to_string(), "8px");
    assert_eq!(evaluate("twice()", &scope).unwrap().to_string(), "twice()");
}

#[test]
fn recursion_is_detected() {
    let scope: Scope = [("@a", "@b + 1"), ("@b", "@c"), ("@c", "@a")].into_iter().collect();
    match evaluate("@a", &scope) {
        Err(ExprError::Eval(EvalError::RecursiveReference(name))) => assert_eq!(name, "@a"),
        other => panic!("应为循环引用错误: {other:?}"),
    }

    // 同一个变量多次出现不算循环
    let scope: Scope = [("@a", "1px"), ("@b", "@a + @a")].into_iter().collect();
    assert_eq!(evaluate("@b + @a", &scope).unwrap().to_string(), "3px");
}

#[test]
fn parse_errors_carry_columns() {
    match parse("(1 + 2") {
        Err(ParseError::UnmatchedParen { .. }) => {}
        other => panic!("应为括号不匹配: {other:?}"),
    }
    match parse("1 + #ff") {
        Err(ParseError::InvalidColorLiteral { literal, column, .. }) => {
            assert_eq!(literal, "#ff");
            assert_eq!(column, 5);
        }
        other => panic!("应为非法颜色: {other:?}"),
    }
    assert!(matches!(
        parse("'abc"),
        Err(ParseError::UnterminatedString { .. })
    ));
    assert!(matches!(
        parse("1 /* note"),
        Err(ParseError::UnterminatedComment { .. })
    ));
}

#[test]
fn tokens_have_a_structural_form() {
    let tokens = parse("10px + 'a'").unwrap();
    let json = serde_json::to_value(&tokens[0]).unwrap();
    assert_eq!(json["kind"], "number");
    assert_eq!(json["unit"], "px");
    assert_eq!(json["range"], serde_json::json!([0, 4]));

    let string = serde_json::to_value(&tokens[1]).unwrap();
    assert_eq!(string["kind"], "string");
    assert_eq!(string["quote"], "'");

    let back: Token = serde_json::from_value(json).unwrap();
    assert_eq!(back, tokens[0]);
    assert!(matches!(back.kind, TokenKind::Number { value, .. } if value == 10.0));
}

#[test]
fn splits_multi_values() {
    assert_eq!(split("5px 10em 40%"), vec!["5px", "10em", "40%"]);
    assert_eq!(
        split("@a + 2px solid darken(red, 10%)"),
        vec!["@a + 2px", "solid", "darken(red, 10%)"]
    );
}
