#[cfg(unix)]
fn main() {
    rlimit_launcher::run_trampoline_main();
}

#[cfg(not(unix))]
fn main() {
    eprintln!("rlimit-trampoline is only supported on Unix targets");
    std::process::exit(1);
}
