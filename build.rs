//! Build-time hints for locating the FFmpeg libraries that `ffmpeg-next`
//! links against. Nothing here changes how the crate is built; it only
//! warns early when discovery is likely to fail.

use std::{env, path::PathBuf};

const WATCHED_VARIABLES: [&str; 5] = [
    "FFMPEG_DIR",
    "FFMPEG_PKG_CONFIG_PATH",
    "PKG_CONFIG_PATH",
    "VCPKG_ROOT",
    "VCPKGRS_TRIPLET",
];

fn main() {
    for variable in WATCHED_VARIABLES {
        println!("cargo:rerun-if-env-changed={variable}");
    }

    if env::var_os("FFMPEG_DIR").is_some() {
        return;
    }

    match env::var("CARGO_CFG_TARGET_OS").unwrap_or_default().as_str() {
        "windows" => windows_hint(),
        "macos" => {
            if env::var_os("PKG_CONFIG_PATH").is_none() {
                println!(
                    "cargo:warning=If FFmpeg is not found, install it with `brew install ffmpeg pkg-config`."
                );
            }
        }
        _ => {}
    }
}

fn windows_hint() {
    let Ok(vcpkg_root) = env::var("VCPKG_ROOT") else {
        println!(
            "cargo:warning=FFMPEG_DIR is not set. On Windows, install FFmpeg with vcpkg and point FFMPEG_DIR at the installed triplet."
        );
        return;
    };

    let triplet = env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| "x64-windows".to_string());
    let candidate = PathBuf::from(vcpkg_root).join("installed").join(triplet);

    if candidate.join("include").join("libavformat").exists() {
        println!(
            "cargo:warning=Found vcpkg FFmpeg at {}; set FFMPEG_DIR to that path.",
            candidate.display()
        );
    } else {
        println!(
            "cargo:warning=VCPKG_ROOT is set but FFmpeg headers were not found under {}.",
            candidate.display()
        );
    }
}
