fn main() {
    println!("cargo:rerun-if-changed=src/vm/trap_handling/helpers.c");

    cc::Build::new()
        .file("src/vm/trap_handling/helpers.c")
        .compile("wjrt-helpers");
}
