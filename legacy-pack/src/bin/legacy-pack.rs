use std::process::ExitCode;

use legacy_pack::run;
use legacy_pack_rs::Variant;

fn main() -> ExitCode {
    run(Variant::Split)
}
