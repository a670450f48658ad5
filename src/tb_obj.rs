use std::{
    cell::{Ref, RefCell, RefMut},
    rc::Rc,
};

// TbObj lets the user mutably share test objects (agents, scoreboards, queues)
// between Tasks. Everything runs on the test's thread, so Rc/RefCell suffice.
pub struct TbObj<T: ?Sized>(Rc<RefCell<T>>);

impl<T> TbObj<T> {
    pub fn new(data: T) -> TbObj<T> {
        TbObj(Rc::new(RefCell::new(data)))
    }
}

impl<T: ?Sized> TbObj<T> {
    pub fn from_rc(rc: Rc<RefCell<T>>) -> TbObj<T> {
        TbObj(rc)
    }
    pub fn get(&self) -> Ref<T> {
        (*self.0).borrow()
    }
    pub fn get_mut(&self) -> RefMut<T> {
        (*self.0).borrow_mut()
    }
    pub fn rc(&self) -> Rc<RefCell<T>> {
        self.0.clone()
    }
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: ?Sized> Clone for TbObj<T> {
    fn clone(&self) -> Self {
        TbObj(self.0.clone())
    }
}
