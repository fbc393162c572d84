pub mod time;

use nanoid::nanoid;

/// Generate a short unique id for jobs, compact enough for menu display.
pub fn shortid() -> String {
    nanoid!(8)
}
