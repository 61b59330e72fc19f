pub mod camera_interface;
pub mod config_storage;
pub mod image_proc;
pub mod image_size;
pub mod packet;
