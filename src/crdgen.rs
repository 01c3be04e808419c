use crate::translationjob::TranslationJob;
use crate::wikitarget::WikiTarget;
use kube::CustomResourceExt;

mod catalogue;
mod translate;
pub mod translationjob;
mod util;
mod wiki;
pub mod wikitarget;
mod worker;

fn main() {
    print!("{}", serde_yaml::to_string(&WikiTarget::crd()).unwrap());
    println!("---");
    print!("{}", serde_yaml::to_string(&TranslationJob::crd()).unwrap());
}
