mod regeneration;
mod upstream;
mod utils;
