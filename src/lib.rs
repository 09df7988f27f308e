pub mod nutrition;

pub mod util {
    pub mod db;
    pub mod env;
    pub mod logging;
}
