use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // the default clip merger shells out to ffmpeg
    let ffmpeg_check = Command::new("ffmpeg").arg("-version").output();
    if ffmpeg_check.is_err() {
        println!("cargo:warning=ffmpeg not found in PATH, FfmpegConcatMerger will not work");
    }
}
