pub mod generation_queue;
pub mod generation_worker;
pub mod gpu_profile;
pub mod input_images;
pub mod installer;
pub mod launcher;
pub mod preview;
