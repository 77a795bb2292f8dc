/// Wraps a forward [`Exchange`] into a new one.
///
/// Tuples of layers apply right to left: `(outer, inner).layer(forward)`
/// is `outer.layer(inner.layer(forward))`.
///
/// [`Exchange`]: super::Exchange
pub trait Layer<E> {
    /// The exchange produced by the layer.
    type Exchange;

    /// Wrap the given forward exchange with the middleware,
    /// returning a new exchange.
    fn layer(&self, forward: E) -> Self::Exchange;
}

impl<T, E> Layer<E> for &T
where
    T: ?Sized + Layer<E>,
{
    type Exchange = T::Exchange;

    fn layer(&self, forward: E) -> Self::Exchange {
        (**self).layer(forward)
    }
}

impl<E, L1, L2> Layer<E> for (L1, L2)
where
    L1: Layer<L2::Exchange>,
    L2: Layer<E>,
{
    type Exchange = L1::Exchange;

    fn layer(&self, forward: E) -> Self::Exchange {
        let (l1, l2) = self;
        l1.layer(l2.layer(forward))
    }
}

impl<E, L1, L2, L3> Layer<E> for (L1, L2, L3)
where
    L1: Layer<L2::Exchange>,
    L2: Layer<L3::Exchange>,
    L3: Layer<E>,
{
    type Exchange = L1::Exchange;

    fn layer(&self, forward: E) -> Self::Exchange {
        let (l1, l2, l3) = self;
        l1.layer((l2, l3).layer(forward))
    }
}
