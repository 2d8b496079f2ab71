mod comfyui;
mod local;
mod openai;
mod stability;
mod stub;

pub use comfyui::ComfyUiProvider;
pub use local::LocalLibraryProvider;
pub use openai::OpenAiProvider;
pub use stability::StabilityProvider;
pub use stub::StubProvider;
