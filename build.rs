use glob::glob;
use std::{io, path::Path, process::Command};

const SHADER_COMPILER_NAME: &str = "glslangValidator";

// Recompiles the GLSL shaders next to their sources. A missing shader
// compiler only warns, so the crate still builds against previously
// compiled SPIR-V.
fn main() {
    println!("cargo:rerun-if-changed=assets/shaders");
    let paths = match glob("assets/shaders/*.glsl") {
        Ok(paths) => paths,
        Err(error) => {
            println!("cargo:warning=bad shader glob: {}", error);
            return;
        }
    };
    for shader_path in paths.flatten() {
        if let Err(error) = compile_shader(&shader_path) {
            println!(
                "cargo:warning=failed to compile {}: {}",
                shader_path.display(),
                error
            );
        }
    }
}

fn compile_shader(shader_path: &Path) -> io::Result<()> {
    let parent = shader_path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = shader_path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "non-utf8 shader file name"))?;
    let output_name = file_name.replace("glsl", "spv");

    let output = Command::new(SHADER_COMPILER_NAME)
        .current_dir(parent)
        .arg("-V")
        .arg(file_name)
        .arg("-o")
        .arg(&output_name)
        .output()?;
    if !output.status.success() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            String::from_utf8_lossy(&output.stdout).into_owned(),
        ));
    }
    Ok(())
}
