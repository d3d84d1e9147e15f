//! Makes every program class and member public.
use rayon::prelude::*;

use crate::{application::DexApplication, class::DexClass};

/// Promotes the access flags of all program classes and their members to
/// `public`. Classpath and library classes are left alone.
pub fn publicize(app: &mut DexApplication) {
    let classes = app.program_classes_mut();
    tracing::debug!(classes = classes.len(), "publicizing program classes");
    classes.par_values_mut().for_each(publicize_class);
}

fn publicize_class(class: &mut DexClass) {
    class.access_flags.promote_to_public();
    for field in class.fields_mut() {
        field.access_flags.promote_to_public();
    }
    for method in class.methods_mut() {
        method.access_flags.promote_to_public();
    }
}
