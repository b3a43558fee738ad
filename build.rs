// Build script to compile GLSL shaders to SPIR-V

use std::path::{Path, PathBuf};
use std::process::Command;

const DEMOS: &[(&str, &[&str])] = &[
    (
        "ao_compute",
        &[
            "gbuffer.vert",
            "gbuffer.frag",
            "fullscreen.vert",
            "composition.frag",
            "ssao_test.comp",
            "blur_horizontal.comp",
            "blur_vertical.comp",
        ],
    ),
    (
        "ao_gaussian_blur",
        &[
            "gbuffer.vert",
            "gbuffer.frag",
            "fullscreen.vert",
            "composition.frag",
            "ssao.frag",
            "blur_horizontal.frag",
            "blur_vertical.frag",
        ],
    ),
];

fn main() {
    println!("cargo:rerun-if-changed=shaders/glsl");

    for (demo, shaders) in DEMOS {
        let out_dir = PathBuf::from("shaders").join(demo);
        if let Err(e) = std::fs::create_dir_all(&out_dir) {
            eprintln!("Warning: could not create {}: {}", out_dir.display(), e);
            return;
        }
        for shader in *shaders {
            let input = PathBuf::from("shaders/glsl").join(demo).join(shader);
            let output = out_dir.join(format!("{shader}.spv"));
            compile_shader(&input, &output);
        }
    }
}

fn compile_shader(input: &Path, output: &Path) {
    // glslc ships with the Vulkan SDK
    let result = Command::new("glslc").arg(input).arg("-o").arg(output).status();

    match result {
        Ok(status) if status.success() => {
            println!("Compiled {} -> {}", input.display(), output.display());
        }
        Ok(status) => {
            panic!(
                "Failed to compile {}: exit code {:?}",
                input.display(),
                status.code()
            );
        }
        Err(e) => {
            eprintln!("Warning: glslc not found ({e})");
            eprintln!("Shaders will not be compiled. Install the Vulkan SDK or compile manually:");
            eprintln!("  glslc {} -o {}", input.display(), output.display());
        }
    }
}
