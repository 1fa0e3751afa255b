#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};

use deno_core::{serde_v8, v8, JsRuntime, RuntimeOptions};
use legacy_pack_rs::adapter::render_main_adapter;
use legacy_pack_rs::bundler::{BundleFormat, BundleRequest, Bundler, SwcBundler};
use legacy_pack_rs::config::{TsConfig, DEFAULT_CONFIG_FILE};
use legacy_pack_rs::inject::{decode_payload, encode_payload};
use legacy_pack_rs::workspace::{Workspace, WORKSPACE_PREFIX};
use legacy_pack_rs::{
    BuildConfig, BuildError, InjectError, Pipeline, Placeholder, Stage, Variant, WorkletInjector,
};
use tempfile::TempDir;

/// Browser APIs the injected loader needs, reduced to what the tests observe.
const BROWSER_SHIMS: &str = r#"
globalThis.atob = function (input) {
    var chars = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    var output = "";
    var buffer = 0;
    var bits = 0;
    for (var i = 0; i < input.length; i++) {
        var c = input.charAt(i);
        if (c === "=") break;
        buffer = ((buffer << 6) | chars.indexOf(c)) & 0xffffff;
        bits += 6;
        if (bits >= 8) {
            bits -= 8;
            output += String.fromCharCode((buffer >> bits) & 0xff);
        }
    }
    return output;
};
globalThis.Blob = function (parts, options) {
    this.parts = parts;
    this.type = options && options.type;
};
globalThis.__blobs = {};
globalThis.URL = {
    createObjectURL: function (blob) {
        var url = "blob:legacy-pack/" + Object.keys(__blobs).length;
        __blobs[url] = blob;
        return url;
    }
};
globalThis.__blobText = function (url) {
    var blob = __blobs[url];
    var binary = "";
    blob.parts.forEach(function (part) {
        for (var i = 0; i < part.length; i++) {
            binary += String.fromCharCode(part[i]);
        }
    });
    return decodeURIComponent(escape(binary));
};
globalThis.__blobType = function (url) {
    return __blobs[url].type;
};
"#;

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn runtime() -> JsRuntime {
    let mut runtime = JsRuntime::new(RuntimeOptions::default());
    runtime
        .execute_script("<shims>", BROWSER_SHIMS.to_string())
        .unwrap();
    runtime
}

fn eval_string(runtime: &mut JsRuntime, script: &str) -> String {
    let res = runtime
        .execute_script("<anon>", script.to_string())
        .unwrap();
    let scope = &mut runtime.handle_scope();
    let local = v8::Local::new(scope, res);
    let value = serde_v8::from_v8::<serde_json::Value>(scope, local).unwrap();
    value.as_str().unwrap().to_string()
}

/// A small library project with an authored processor entry.
fn project() -> TempDir {
    let root = tempfile::tempdir().unwrap();
    write(
        &root.path().join("src").join("index.ts"),
        "export function foo(): string {\n    return \"bar\";\n}\n",
    );
    write(
        &root.path().join("src").join("processor.ts"),
        "const NAME: string = \"spessasynth-worklet-processor\";\nclass Processor extends AudioWorkletProcessor {\n    process(): boolean {\n        return true;\n    }\n}\nregisterProcessor(NAME, Processor);\n",
    );
    write(
        &root.path().join(DEFAULT_CONFIG_FILE),
        r#"{
    "processor": { "adapter": "src/processor.ts" },
    "tools": { "babel": ["sh", "-c", "cat"] },
    "polyfills": [],
    "standaloneProcessor": true
}"#,
    );
    root
}

fn load_config(root: &Path) -> BuildConfig {
    BuildConfig::load(&root.join(DEFAULT_CONFIG_FILE)).unwrap()
}

fn workspace_dirs(root: &Path) -> Vec<PathBuf> {
    fs::read_dir(root)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| {
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(WORKSPACE_PREFIX)
        })
        .collect()
}

#[test]
fn test_injected_bundle_runs() {
    let root = tempfile::tempdir().unwrap();
    write(
        &root.path().join("src").join("index.ts"),
        "export function foo(): string {\n    return \"bar\";\n}\n",
    );
    let workspace = Workspace::create_in(root.path()).unwrap();
    let adapter = workspace
        .write(
            "index_legacy.ts",
            &render_main_adapter(Path::new("src/index.ts"), &Placeholder::default()),
        )
        .unwrap();

    let bundler = SwcBundler::new(root.path().to_path_buf(), TsConfig::default());
    let bundle = bundler
        .bundle(
            &BundleRequest {
                entry: adapter,
                format: BundleFormat::Iife,
                global_name: Some("SpessaSynthLib".to_string()),
                output: "spessasynth_lib.js".to_string(),
            },
            &workspace,
        )
        .unwrap();

    let injector = WorkletInjector::new(&Placeholder::default()).unwrap();
    let injection = injector.inject(&bundle.code, b"hello-world").unwrap();

    let mut runtime = runtime();
    runtime
        .execute_script("spessasynth_lib.js", injection.code)
        .unwrap();
    assert_eq!(eval_string(&mut runtime, "SpessaSynthLib.foo()"), "bar");
    assert_eq!(
        eval_string(
            &mut runtime,
            "__blobText(SpessaSynthLib.createWorkletBlobURL())"
        ),
        "hello-world"
    );
    assert_eq!(
        eval_string(
            &mut runtime,
            "__blobType(SpessaSynthLib.createWorkletBlobURL())"
        ),
        "application/javascript"
    );
}

#[test]
fn test_stub_throws_before_injection() {
    let mut runtime = runtime();
    runtime
        .execute_script(
            "stub.js",
            "function createWorkletBlobURL() { throw new Error(\"not injected\"); }".to_string(),
        )
        .unwrap();
    assert_eq!(
        eval_string(
            &mut runtime,
            "(function () { try { createWorkletBlobURL(); return \"returned\"; } catch (e) { return e.message; } })()"
        ),
        "not injected"
    );
}

#[test]
fn test_integrated_pipeline_inlines_processor() {
    let root = project();
    let report = Pipeline::new(Variant::Integrated, load_config(root.path()))
        .run()
        .unwrap();

    let out_dir = root.path().canonicalize().unwrap().join("js").join("plugins");
    let lib = fs::read_to_string(out_dir.join("spessasynth_lib.js")).unwrap();
    let processor = fs::read_to_string(out_dir.join("spessasynth_processor.js")).unwrap();
    assert_eq!(report.artifacts.len(), 2);
    assert_eq!(report.payload_bytes, processor.len());
    assert!(processor.contains("registerProcessor("));
    assert!(!lib.contains("registerProcessor("));
    assert!(workspace_dirs(root.path()).is_empty());

    // The embedded literal is exactly the standalone processor
    let literal = encode_payload(processor.as_bytes());
    assert!(lib.contains(&format!("\"{literal}\"")));
    assert_eq!(decode_payload(&literal).unwrap(), processor.as_bytes());
    // Loader locals are mangled; the global name is checked by running it below
    assert!(!lib.contains("base64Code"));

    let mut runtime = runtime();
    runtime.execute_script("spessasynth_lib.js", lib).unwrap();
    assert_eq!(eval_string(&mut runtime, "SpessaSynthLib.foo()"), "bar");
    assert_eq!(
        eval_string(
            &mut runtime,
            "__blobText(SpessaSynthLib.createWorkletBlobURL())"
        ),
        processor
    );
}

#[test]
fn test_unmatched_placeholder_keeps_previous_artifacts() {
    let root = project();
    write(
        &root.path().join("src").join("index_legacy.ts"),
        "export * from \"./index.ts\";\nexport const createWorkletBlobURL = (): string => {\n    throw new Error(\"x\");\n};\n",
    );
    let mut config = load_config(root.path());
    config.main.adapter = Some(PathBuf::from("src/index_legacy.ts"));

    let out_dir = config.out_dir();
    write(&out_dir.join("spessasynth_lib.js"), "previous lib");
    write(&out_dir.join("spessasynth_processor.js"), "previous processor");

    let failure = Pipeline::new(Variant::Integrated, config).run().unwrap_err();
    assert_eq!(failure.stage, Stage::Inject);
    assert_eq!(failure.target, "spessasynth_lib.js");
    let dump = root
        .path()
        .canonicalize()
        .unwrap()
        .join(".legacy-pack-debug")
        .join("debug_spessasynth_lib.js");
    assert!(matches!(
        failure.source,
        BuildError::Inject(InjectError::NoMatch { dump: Some(ref path), .. }) if *path == dump
    ));
    assert!(dump.is_file());

    assert!(workspace_dirs(root.path()).is_empty());
    assert_eq!(
        fs::read_to_string(out_dir.join("spessasynth_lib.js")).unwrap(),
        "previous lib"
    );
    assert_eq!(
        fs::read_to_string(out_dir.join("spessasynth_processor.js")).unwrap(),
        "previous processor"
    );
    assert_eq!(fs::read_dir(&out_dir).unwrap().count(), 2);
}

#[test]
fn test_missing_polyfill_prelude_fails_before_building() {
    let root = project();
    let mut config = load_config(root.path());
    config.polyfills = BuildConfig::default().polyfills;

    let failure = Pipeline::new(Variant::Integrated, config).run().unwrap_err();
    assert_eq!(failure.stage, Stage::Polyfill);
    assert!(matches!(failure.source, BuildError::Io { .. }));
    assert!(workspace_dirs(root.path()).is_empty());
    assert!(!root.path().join("js").exists());
}
