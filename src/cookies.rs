use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::util::lock_unpoisoned;

/// Session-wide jar. It records the cookies of the latest response and is
/// cleared before every dispatch; outbound requests never read from it.
#[derive(Debug, Default)]
pub(crate) struct CookieJar {
    cookies: Mutex<BTreeMap<String, String>>,
}

impl CookieJar {
    pub(crate) fn clear(&self) {
        lock_unpoisoned(&self.cookies).clear();
    }

    pub(crate) fn store(&self, cookies: Vec<(String, String)>) {
        if cookies.is_empty() {
            return;
        }
        let mut jar = lock_unpoisoned(&self.cookies);
        jar.extend(cookies);
    }

    pub(crate) fn snapshot(&self) -> Vec<(String, String)> {
        lock_unpoisoned(&self.cookies)
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}
