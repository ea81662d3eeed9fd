mod btree;
mod mvbt;
mod spatial;

#[ctor::ctor]
fn init() {
    colog::init();
}
