use legacy_pack_rs::inject::{decode_payload, InjectError};
use legacy_pack_rs::{Placeholder, PlaceholderForm, WorkletInjector};
use regex::Regex;
use rstest::rstest;

const BABEL_MAIN: &str = r#"var SpessaSynthLib = function (exports) {
  "use strict";

  function foo() {
    return "bar";
  }
  function createWorkletBlobURL() {
    throw new Error("createWorkletBlobURL is only available in the single-file legacy build");
  }
  exports.createWorkletBlobURL = createWorkletBlobURL;
  exports.foo = foo;
  return exports;
}({});
"#;

const ESM_MAIN: &str = r#"function foo() { return "bar"; }
export function createWorkletBlobURL() { throw new Error("not injected"); }
export { foo };
"#;

const LOWERED_MAIN: &str = r#"var SpessaSynthLib = {
  foo: function () { return "bar"; },
  createWorkletBlobURL: function () { throw new Error("not injected"); }
};
"#;

fn injector() -> WorkletInjector {
    WorkletInjector::new(&Placeholder::default()).unwrap()
}

/// Pulls the embedded base64 literal back out of injected code.
fn embedded_literal(code: &str) -> String {
    let re = Regex::new(r#"var base64Code = "([A-Za-z0-9+/=]*)";"#).unwrap();
    re.captures(code).unwrap()[1].to_string()
}

#[rustfmt::skip]
mod test_payload_round_trip {
    use crate::*;

    #[rstest]
    fn test(
        #[values(
            "registerProcessor(\"p\", P);",
            "var s = 'single' + \"double\" + `template`;",
            "var re = /\\d+\\.\\d*/; var path = \"C:\\\\Games\\\\www\";",
            "var name = \"Fl\u{fc}gel \u{2014} \u{30d4}\u{30a2}\u{30ce} \u{1f3b9}\";",
            "",
        )]
        payload: &str,
    ) {
        let injection = injector().inject(BABEL_MAIN, payload.as_bytes()).unwrap();
        let literal = embedded_literal(&injection.code);
        assert_eq!(literal, injection.encoded);
        assert_eq!(decode_payload(&literal).unwrap(), payload.as_bytes());
    }
}

#[rustfmt::skip]
mod test_form_priority {
    use crate::*;

    #[rstest]
    #[case(BABEL_MAIN, PlaceholderForm::Declaration, "function createWorkletBlobURL() {")]
    #[case(ESM_MAIN, PlaceholderForm::Exported, "export function createWorkletBlobURL() {")]
    #[case(LOWERED_MAIN, PlaceholderForm::ObjectMethod, "createWorkletBlobURL: function () {")]
    fn test(#[case] target: &str, #[case] form: PlaceholderForm, #[case] rendered: &str) {
        let injection = injector().inject(target, b"hello-world").unwrap();
        assert_eq!(injection.form, form);
        assert!(injection.code.contains(rendered), "{}", injection.code);

        // Everything outside the stub is untouched
        assert!(injection.code.starts_with(&target[..injection.replaced.start]));
        assert!(injection.code.ends_with(&target[injection.replaced.end..]));

        // No trace of the throwing stub remains
        assert!(!injection.code.contains("throw new Error(\"not injected\")"));
        assert!(!injection.code.contains("only available in the single-file"));
        assert!(injection.code.contains("return URL.createObjectURL(blob);"));
        assert!(injection.code.contains("type: \"application/javascript\""));
        assert_eq!(injection.code.matches('{').count(), injection.code.matches('}').count());
    }
}

#[test]
fn test_only_first_stub_is_replaced() {
    let target = format!("{BABEL_MAIN}{BABEL_MAIN}");
    let injection = injector().inject(&target, b"hello-world").unwrap();
    assert_eq!(injection.code.matches("var base64Code").count(), 1);
    assert_eq!(
        injection.code.matches("only available in the single-file").count(),
        1
    );
}

#[test]
fn test_declaration_preferred_over_object_method() {
    let target = format!("{LOWERED_MAIN}{BABEL_MAIN}");
    let injection = injector().inject(&target, b"hello-world").unwrap();
    assert_eq!(injection.form, PlaceholderForm::Declaration);
    assert!(injection
        .code
        .contains("createWorkletBlobURL: function () { throw new Error(\"not injected\"); }"));
}

#[test]
fn test_second_injection_fails() {
    let injector = injector();
    let first = injector.inject(BABEL_MAIN, b"hello-world").unwrap();
    let err = injector.inject(&first.code, b"hello-world").unwrap_err();
    assert!(matches!(err, InjectError::NoMatch { .. }));
}

#[rstest]
#[case::renamed(BABEL_MAIN.replace("createWorkletBlobURL", "createWorkletURL"))]
#[case::absent("var SpessaSynthLib = {};".to_string())]
#[case::arrow("var createWorkletBlobURL = () => { throw new Error(\"x\"); };".to_string())]
fn test_no_match(#[case] target: String) {
    let err = injector().inject(&target, b"hello-world").unwrap_err();
    match err {
        InjectError::NoMatch {
            placeholder,
            attempted,
            dump,
        } => {
            assert_eq!(placeholder, "createWorkletBlobURL");
            assert_eq!(attempted, PlaceholderForm::PRIORITY.to_vec());
            assert!(dump.is_none());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_custom_placeholder() {
    let placeholder = Placeholder {
        name: "workletURL".to_string(),
        marker: "SyntaxError".to_string(),
        media_type: "text/javascript".to_string(),
    };
    let injector = WorkletInjector::new(&placeholder).unwrap();
    let target = "function workletURL() { throw new SyntaxError(\"stub\"); }";
    let injection = injector.inject(target, b"x").unwrap();
    assert!(injection.code.starts_with("function workletURL() {"));
    assert!(injection.code.contains("type: \"text/javascript\""));

    // The default marker does not match a stub built around another error type
    assert!(WorkletInjector::new(&Placeholder {
        name: "workletURL".to_string(),
        ..Placeholder::default()
    })
    .unwrap()
    .locate(target)
    .is_none());
}
