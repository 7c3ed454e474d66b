//! Capability probe: one query pass at reset, consumed everywhere else to
//! gate optional paths.

use crate::backend::GlBackend;
use log::info;

/// What the active context can do. Probed from the extension list and the
/// context version, once per [`Context::reset`](crate::Context::reset).
#[derive(Debug, Clone, Copy, Default)]
pub struct Caps {
    pub multisample: bool,
    pub compute: bool,
    pub float_canvas: bool,
    pub debug_marker: bool,
    pub debug_output: bool,
    pub memory_info: bool,
    pub instancing: bool,
    pub seamless_cubemap: bool,
    pub anisotropic_filtering: bool,
}

const PROBED_EXTS: [&str; 10] = [
    "GL_ARB_multisample",
    "GL_ARB_compute_shader",
    "GL_ARB_texture_float",
    "GL_EXT_debug_marker",
    "GL_ARB_debug_output",
    "GL_KHR_debug",
    "GL_NVX_gpu_memory_info",
    // guaranteed by desktop GL 3.3+ or GLES 3.0+
    "GL_ARB_instanced_arrays",
    "GL_ARB_seamless_cube_map",
    "GL_EXT_texture_filter_anisotropic",
];

pub(crate) fn probe(backend: &dyn GlBackend) -> Caps {
    let exts = backend.extensions();
    let mut found = [false; PROBED_EXTS.len()];
    for ext in &exts {
        if let Some(i) = PROBED_EXTS.iter().position(|probed| *probed == ext.as_str()) {
            found[i] = true;
        }
    }

    let gles = backend.is_gles();
    let version = backend.context_version();
    let gl30 = version >= 30 && !gles;
    let gl32 = version >= 32 && !gles;
    let gl33 = version >= 33 && !gles;
    let gl43 = version >= 43 && !gles;
    let gl46 = version >= 46 && !gles;
    let gles30 = version >= 30 && gles;
    let gles31 = version >= 31 && gles;

    Caps {
        multisample: found[0] || gl30,
        compute: found[1] || gles31 || gl43,
        float_canvas: found[2] || gles30 || gl30,
        debug_marker: found[3] || found[5],
        debug_output: found[4] || gl43,
        memory_info: found[6],
        instancing: found[7] || gl33 || gles30,
        seamless_cubemap: found[8] || gl32,
        anisotropic_filtering: found[9] || gl46,
    }
}

/// Log the context's identity, extension list and probed feature set.
pub(crate) fn dump(backend: &mut dyn GlBackend, caps: &Caps) {
    info!("GL vendor: {}", backend.vendor());
    info!("GL renderer: {}", backend.renderer());
    info!("GL version: {}", backend.version_string());
    info!(
        "GL shader compiler control: {}",
        backend.shader_compiler_present()
    );

    info!("GL extensions:");
    for ext in backend.extensions() {
        info!("\t{ext}");
    }

    info!(
        "renderer: {}{}",
        if backend.is_gles() { "GLES" } else { "GL" },
        backend.context_version() / 10
    );
    info!("instancing: {}", caps.instancing);
    info!("compute: {}", caps.compute);
    info!("fp canvas: {}", caps.float_canvas);
    info!("multisample: {}", caps.multisample);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;

    #[test]
    fn desktop_46_reports_everything_but_memory_info() {
        let backend = RecordingBackend::new();
        let caps = probe(&backend);
        assert!(caps.compute);
        assert!(caps.instancing);
        assert!(caps.multisample);
        assert!(caps.float_canvas);
        assert!(caps.seamless_cubemap);
        assert!(caps.anisotropic_filtering);
        assert!(caps.debug_output);
        assert!(caps.debug_marker); // via GL_KHR_debug
        assert!(!caps.memory_info);
    }
}
