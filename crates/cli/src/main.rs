//! The thin binary wrapper for ctrbuild; everything lives in
//! `ctrbuild-lib`.

fn main() {
    ctrbuild_utils::run_main(|| ctrbuild_lib::cli::run_from_iter(std::env::args_os()))
}
