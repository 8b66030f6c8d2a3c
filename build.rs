use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    // 链接脚本只在裸机目标 (thumbv7m-none-eabi) 上需要
    let target = env::var("TARGET").unwrap_or_default();

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-changed=device.x");

    if !target.starts_with("thumb") {
        return;
    }

    // memory.x / device.x 放入 OUT_DIR，供 cortex-m-rt 的 link.x 引用
    let out = PathBuf::from(env::var_os("OUT_DIR").unwrap());
    fs::write(out.join("memory.x"), include_bytes!("memory.x")).unwrap();
    fs::write(out.join("device.x"), include_bytes!("device.x")).unwrap();
    println!("cargo:rustc-link-search={}", out.display());

    println!("cargo:rustc-link-arg-bins=--nmagic");
    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    if env::var_os("CARGO_FEATURE_LOG_DEFMT").is_some() {
        println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
    }
}
